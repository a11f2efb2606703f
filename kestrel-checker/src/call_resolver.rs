//! Overload resolution.
//!
//! Candidates are collected level by level, innermost first. The first level
//! with any visible, non-hidden match decides the outcome; levels are never
//! merged. Within that level every candidate is checked for applicability
//! (argument mapping, receiver, type-argument inference) and the most
//! specific applicable one wins.

use crate::error::{ResolutionError, ResolutionResult};
use crate::inference::ConstraintSystem;
use crate::lifetime::Checkpoint;
use crate::phases::AdvanceError;
use crate::scope::{ScopeChain, ScopeLevel};
use crate::symbol_table::SymbolTable;
use crate::symbols::{CallableId, CallableKind, CallableSymbol, ClassId, TypeParamId};
use crate::types::{ErrorKind, Substitution, Type};
use kestrel_syntax::{DeprecationLevel, Deprecated, Expr, LambdaExpr, QualifiedName, Span, Symbol};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `f(...)`: functions, constructors and function-typed locals.
    Invocation,
    /// `a.p` or `p`: properties.
    PropertyAccess,
}

/// A lambda argument, typed lazily against each candidate's parameter.
#[derive(Debug, Clone, Copy)]
pub struct LambdaArgument<'a> {
    /// The lambda expression itself.
    pub expr: &'a Expr,
    pub lambda: &'a LambdaExpr,
}

#[derive(Debug, Clone)]
pub enum CallArgument<'a> {
    Value { ty: Type, span: Span },
    Lambda(LambdaArgument<'a>),
}

impl CallArgument<'_> {
    pub fn span(&self) -> Span {
        match self {
            CallArgument::Value { span, .. } => *span,
            CallArgument::Lambda(lambda) => lambda.expr.span,
        }
    }
}

/// What a candidate's parameter tells a lambda about its own type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LambdaExpectation {
    pub parameters: Option<Vec<Type>>,
    pub receiver: Option<Type>,
    pub return_type: Option<Type>,
}

impl LambdaExpectation {
    pub(crate) fn from_parameter(ty: &Type, variables: &[TypeParamId]) -> Self {
        match ty {
            Type::Function {
                parameters,
                receiver,
                return_type,
                ..
            } => LambdaExpectation {
                parameters: Some(parameters.clone()),
                receiver: receiver.as_deref().cloned(),
                return_type: (!variables.iter().any(|v| return_type.mentions_parameter(*v)))
                    .then(|| return_type.as_ref().clone()),
            },
            _ => LambdaExpectation::default(),
        }
    }
}

/// Types lambda arguments for the resolver. Implementations must not record
/// anything: a lambda is typed once per candidate it is tried against.
pub trait LambdaAnalyzer {
    fn lambda_type(&mut self, lambda: &LambdaArgument<'_>, expectation: &LambdaExpectation) -> Type;
}

/// For calls without lambda arguments.
pub struct NoLambdas;

impl LambdaAnalyzer for NoLambdas {
    fn lambda_type(&mut self, _lambda: &LambdaArgument<'_>, _expectation: &LambdaExpectation) -> Type {
        Type::Error(ErrorKind::Internal)
    }
}

#[derive(Debug, Clone)]
pub struct Call<'a> {
    pub kind: CallKind,
    pub name: Symbol,
    /// Type of the explicit receiver, if any.
    pub receiver: Option<Type>,
    pub safe: bool,
    pub arguments: Vec<CallArgument<'a>>,
    /// Whether the last argument was written as a trailing lambda.
    pub has_trailing_lambda: bool,
    pub type_arguments: Vec<Type>,
    pub expected: Option<Type>,
    pub scope: &'a ScopeChain,
}

impl<'a> Call<'a> {
    pub fn invocation(name: Symbol, arguments: Vec<CallArgument<'a>>, scope: &'a ScopeChain) -> Self {
        Call {
            kind: CallKind::Invocation,
            name,
            receiver: None,
            safe: false,
            arguments,
            has_trailing_lambda: false,
            type_arguments: Vec::new(),
            expected: None,
            scope,
        }
    }

    pub fn property(name: Symbol, receiver: Option<Type>, scope: &'a ScopeChain) -> Self {
        Call {
            kind: CallKind::PropertyAccess,
            receiver,
            ..Call::invocation(name, Vec::new(), scope)
        }
    }

    pub fn with_receiver(mut self, receiver: Type, safe: bool) -> Self {
        self.receiver = Some(receiver);
        self.safe = safe;
        self
    }
}

/// What a call resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallTarget {
    Callable(CallableId),
    /// A local value of function type.
    Local(Symbol),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inapplicability {
    TooManyArguments,
    NoValueForParameter(Symbol),
    WrongNumberOfTypeArguments { expected: usize },
    TypeMismatch { argument: usize, expected: Type, actual: Type },
    UpperBoundViolated { parameter: TypeParamId, bound: Type, actual: Type },
    ReceiverMismatch { expected: Type, actual: Type },
}

#[derive(Debug, Clone, PartialEq)]
pub struct InapplicableCandidate {
    pub target: CallTarget,
    pub reason: Inapplicability,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCall {
    pub target: CallTarget,
    /// Declaring-class and inferred type arguments together.
    pub substitution: Substitution,
    /// Inferred or explicit type arguments, in declaration order.
    pub type_arguments: Vec<Type>,
    /// Substituted parameter type each argument was matched against.
    pub argument_types: Vec<Type>,
    pub return_type: Type,
    pub dispatch_receiver: Option<Type>,
    pub extension_receiver: Option<Type>,
    pub deprecation: Option<Deprecated>,
    /// A nullable receiver used without `?.`.
    pub unsafe_receiver: bool,
    /// The winner's return type could not be computed without re-entering it.
    pub recursive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallResolution {
    Success(Box<ResolvedCall>),
    Ambiguity { candidates: Vec<CallableId> },
    Unresolved {
        inapplicable: Vec<InapplicableCandidate>,
        invisible: Vec<CallableId>,
    },
}

impl CallResolution {
    pub fn resolved(&self) -> Option<&ResolvedCall> {
        match self {
            CallResolution::Success(call) => Some(call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportLevel {
    Explicit,
    Package,
    Star,
    Default,
}

const IMPORT_LEVELS: [ImportLevel; 4] = [
    ImportLevel::Explicit,
    ImportLevel::Package,
    ImportLevel::Star,
    ImportLevel::Default,
];

#[derive(Debug, Clone)]
enum CandidateSource {
    Callable {
        symbol: Arc<CallableSymbol>,
        /// Maps the declaring class's parameters as seen through the receiver.
        member_subst: Substitution,
        dispatch: Option<Type>,
        extension_receiver: Option<Type>,
    },
    Local {
        name: Symbol,
        ty: Type,
    },
}

impl CandidateSource {
    fn target(&self) -> CallTarget {
        match self {
            CandidateSource::Callable { symbol, .. } => CallTarget::Callable(symbol.id),
            CandidateSource::Local { name, .. } => CallTarget::Local(*name),
        }
    }
}

#[derive(Debug, Clone)]
struct Applicable {
    source: CandidateSource,
    substitution: Substitution,
    type_arguments: Vec<Type>,
    argument_types: Vec<Type>,
    extension_receiver: Option<Type>,
    /// Declared extension receiver after substitution.
    receiver_parameter: Option<Type>,
    used_vararg: bool,
    used_defaults: bool,
    generic: bool,
    unsafe_receiver: bool,
}

/// Which parameter each argument goes to.
struct ArgumentMapping {
    /// Parameter index per argument; `is_vararg` marks element matches.
    targets: Vec<(usize, bool)>,
    used_defaults: bool,
    used_vararg: bool,
}

fn map_arguments(
    parameters: &[crate::symbols::ValueParameterDecl],
    argument_count: usize,
    trailing_lambda: bool,
) -> Result<ArgumentMapping, Inapplicability> {
    let mut targets = Vec::with_capacity(argument_count);
    let mut used_defaults = false;
    let mut used_vararg = false;
    let (positional, trailing_parameter) = match (trailing_lambda, parameters.len()) {
        (true, 0) => return Err(Inapplicability::TooManyArguments),
        (true, n) => match argument_count.checked_sub(1) {
            Some(positional) => (positional, Some(n - 1)),
            None => return Err(Inapplicability::NoValueForParameter(parameters[n - 1].name)),
        },
        (false, _) => (argument_count, None),
    };
    let positional_parameters = trailing_parameter.unwrap_or(parameters.len());
    let mut next = 0;
    for (index, parameter) in parameters.iter().enumerate().take(positional_parameters) {
        if parameter.is_vararg {
            used_vararg = true;
            while next < positional {
                targets.push((index, true));
                next += 1;
            }
        } else if next < positional {
            targets.push((index, false));
            next += 1;
        } else if parameter.has_default {
            used_defaults = true;
        } else {
            return Err(Inapplicability::NoValueForParameter(parameter.name));
        }
    }
    if next < positional {
        return Err(Inapplicability::TooManyArguments);
    }
    if let Some(index) = trailing_parameter {
        let is_vararg = parameters[index].is_vararg;
        used_vararg |= is_vararg;
        targets.push((index, is_vararg));
    }
    Ok(ArgumentMapping {
        targets,
        used_defaults,
        used_vararg,
    })
}

/// Resolves calls against one symbol table.
pub struct CallResolver<'t> {
    table: &'t SymbolTable,
    checkpoint: &'t dyn Checkpoint,
}

impl<'t> CallResolver<'t> {
    pub fn new(table: &'t SymbolTable, checkpoint: &'t dyn Checkpoint) -> Self {
        CallResolver { table, checkpoint }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(name = %call.name))]
    pub fn resolve(&self, call: &Call<'_>, lambdas: &mut dyn LambdaAnalyzer) -> ResolutionResult<CallResolution> {
        if let Some(failure) = self.table.module_failure(call.scope.module) {
            return Err(ResolutionError::Configuration(failure.clone()));
        }
        let mut invisible = Vec::new();
        let mut inapplicable = Vec::new();
        for level in self.levels(call) {
            self.checkpoint.checkpoint()?;
            let candidates = self.filter_level(level, call, &mut invisible);
            if candidates.is_empty() {
                continue;
            }
            let mut applicable = Vec::new();
            for candidate in candidates {
                self.checkpoint.checkpoint()?;
                match self.check_applicability(&candidate, call, lambdas) {
                    Ok(found) => applicable.push(found),
                    Err(reason) => inapplicable.push(InapplicableCandidate {
                        target: candidate.target(),
                        reason,
                    }),
                }
            }
            let outcome = self.choose(applicable, call);
            debug!("resolved at level with {} inapplicable", inapplicable.len());
            return Ok(match outcome {
                Some(outcome) => outcome,
                None => CallResolution::Unresolved { inapplicable, invisible },
            });
        }
        trace!("no level matched");
        Ok(CallResolution::Unresolved { inapplicable, invisible })
    }

    fn accepts_kind(&self, call: &Call<'_>, kind: CallableKind) -> bool {
        match call.kind {
            CallKind::Invocation => kind != CallableKind::Property,
            CallKind::PropertyAccess => kind == CallableKind::Property,
        }
    }

    /// Removes hidden candidates and sets aside invisible ones.
    fn filter_level(
        &self,
        level: Vec<CandidateSource>,
        call: &Call<'_>,
        invisible: &mut Vec<CallableId>,
    ) -> Vec<CandidateSource> {
        let mut kept = Vec::with_capacity(level.len());
        for candidate in level {
            if let CandidateSource::Callable { symbol, .. } = &candidate {
                let hidden = self
                    .table
                    .deprecation_of(symbol)
                    .is_some_and(|d| d.level == DeprecationLevel::Hidden);
                if hidden {
                    continue;
                }
                if !self.table.is_callable_visible(symbol, call.scope) {
                    if !invisible.contains(&symbol.id) {
                        invisible.push(symbol.id);
                    }
                    continue;
                }
            }
            kept.push(candidate);
        }
        kept
    }

    // ---- candidate collection ----

    fn levels(&self, call: &Call<'_>) -> Vec<Vec<CandidateSource>> {
        let mut levels = Vec::new();
        match &call.receiver {
            Some(receiver) => {
                let receiver = if call.safe { receiver.make_not_null() } else { receiver.clone() };
                levels.push(self.member_candidates(&receiver, call, Some(receiver.clone())));
                for level in IMPORT_LEVELS {
                    levels.push(self.extension_candidates(level, &receiver, call));
                }
            }
            None => {
                if call.kind == CallKind::Invocation {
                    if let Some(local) = call.scope.local(call.name) {
                        if matches!(local.ty, Type::Function { .. }) {
                            levels.push(vec![CandidateSource::Local {
                                name: local.name,
                                ty: local.ty.clone(),
                            }]);
                        }
                    }
                    levels.push(self.lexical_constructors(call));
                }
                for (receiver, _) in call.scope.implicit_receivers() {
                    levels.push(self.member_candidates(&receiver, call, Some(receiver.clone())));
                    for level in IMPORT_LEVELS {
                        levels.push(self.extension_candidates(level, &receiver, call));
                    }
                }
                for level in IMPORT_LEVELS {
                    levels.push(self.top_level_candidates(level, call));
                }
            }
        }
        levels
    }

    /// Nominal types whose member scopes a receiver of type `ty` exposes.
    fn receiver_views(&self, ty: &Type) -> Vec<Type> {
        match ty {
            Type::Nominal { .. } => vec![ty.make_not_null()],
            Type::Flexible { lower, .. } => self.receiver_views(lower),
            Type::Intersection(i) => i.conjuncts().iter().flat_map(|c| self.receiver_views(c)).collect(),
            Type::TypeParameter { parameter, .. } => {
                let bounds = self.table.type_parameter_bounds(*parameter);
                if bounds.is_empty() {
                    vec![self.table.any_type()]
                } else {
                    bounds.iter().flat_map(|b| self.receiver_views(b)).collect()
                }
            }
            Type::Function { .. } => vec![self.table.any_type()],
            Type::Error(_) => Vec::new(),
        }
    }

    fn member_candidates(&self, receiver: &Type, call: &Call<'_>, dispatch: Option<Type>) -> Vec<CandidateSource> {
        let mut found: Vec<CandidateSource> = Vec::new();
        for view in self.receiver_views(receiver) {
            let Some(class) = view.classifier() else {
                continue;
            };
            let receiver_subst = self.table.class_substitution(class, view.arguments());
            for entry in self.table.member_scope(class).named(call.name) {
                let Some(symbol) = self.table.callable(entry.callable) else {
                    continue;
                };
                if !self.accepts_kind(call, symbol.kind) || symbol.is_extension() {
                    continue;
                }
                let already = found
                    .iter()
                    .any(|c| matches!(c, CandidateSource::Callable { symbol: s, .. } if s.id == symbol.id));
                if already {
                    continue;
                }
                let owner = entry.owner.apply_subst(&receiver_subst);
                found.push(CandidateSource::Callable {
                    member_subst: self.table.owner_substitution(&owner),
                    symbol,
                    dispatch: dispatch.clone(),
                    extension_receiver: None,
                });
            }
        }
        found
    }

    fn extension_candidates(&self, level: ImportLevel, receiver: &Type, call: &Call<'_>) -> Vec<CandidateSource> {
        self.callables_at(level, call)
            .into_iter()
            .filter_map(|id| self.table.callable(id))
            .filter(|symbol| symbol.is_extension() && self.accepts_kind(call, symbol.kind))
            .map(|symbol| CandidateSource::Callable {
                symbol,
                member_subst: Substitution::new(),
                dispatch: None,
                extension_receiver: Some(receiver.clone()),
            })
            .collect()
    }

    fn top_level_candidates(&self, level: ImportLevel, call: &Call<'_>) -> Vec<CandidateSource> {
        let mut ids = self.callables_at(level, call);
        if call.kind == CallKind::Invocation {
            ids.extend(self.constructors_at(level, call));
        }
        ids.into_iter()
            .filter_map(|id| self.table.callable(id))
            .filter(|symbol| !symbol.is_extension() && self.accepts_kind(call, symbol.kind))
            .map(|symbol| CandidateSource::Callable {
                symbol,
                member_subst: Substitution::new(),
                dispatch: None,
                extension_receiver: None,
            })
            .collect()
    }

    /// Constructors of local classes and of classes nested in enclosing classes.
    fn lexical_constructors(&self, call: &Call<'_>) -> Vec<CandidateSource> {
        let class = call.scope.innermost_first().find_map(|level| match level {
            ScopeLevel::LocalClass { name, class } if *name == call.name => Some(*class),
            ScopeLevel::Class { class, .. } => self
                .table
                .class(*class)
                .and_then(|c| self.table.nested_class(&c, call.name)),
            _ => None,
        });
        class
            .map(|id| self.constructors_of(id))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| self.table.callable(id))
            .map(|symbol| CandidateSource::Callable {
                symbol,
                member_subst: Substitution::new(),
                dispatch: None,
                extension_receiver: None,
            })
            .collect()
    }

    fn constructors_of(&self, class: ClassId) -> Vec<CallableId> {
        self.table.class(class).map(|c| c.constructors.clone()).unwrap_or_default()
    }

    /// `(package, simple name)` pairs one import level contributes for `name`.
    fn level_targets(&self, level: ImportLevel, call: &Call<'_>) -> Vec<(QualifiedName, Symbol)> {
        let scope = call.scope;
        match level {
            ImportLevel::Explicit => scope
                .imports
                .explicit(call.name)
                .iter()
                .filter_map(|target| target.last().map(|last| (target.parent(), last)))
                .collect(),
            ImportLevel::Package => vec![(scope.package.clone(), call.name)],
            ImportLevel::Star => scope
                .imports
                .star_packages()
                .iter()
                .map(|package| (package.clone(), call.name))
                .collect(),
            ImportLevel::Default => self
                .table
                .default_imports()
                .iter()
                .map(|package| (package.clone(), call.name))
                .collect(),
        }
    }

    fn callables_at(&self, level: ImportLevel, call: &Call<'_>) -> Vec<CallableId> {
        let mut ids = Vec::new();
        for (package, name) in self.level_targets(level, call) {
            for id in self.table.top_level_callables(call.scope.module, &package, name) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        ids
    }

    fn constructors_at(&self, level: ImportLevel, call: &Call<'_>) -> Vec<CallableId> {
        let mut ids = Vec::new();
        for (package, name) in self.level_targets(level, call) {
            if let Some(class) = self.table.classifier_in_visible(call.scope.module, &package.child(name)) {
                for id in self.constructors_of(class) {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
        ids
    }

    // ---- applicability ----

    fn check_applicability(
        &self,
        candidate: &CandidateSource,
        call: &Call<'_>,
        lambdas: &mut dyn LambdaAnalyzer,
    ) -> Result<Applicable, Inapplicability> {
        match candidate {
            CandidateSource::Local { ty, .. } => self.check_local(candidate, ty, call, lambdas),
            CandidateSource::Callable {
                symbol,
                member_subst,
                dispatch,
                extension_receiver,
            } => self.check_callable(
                candidate,
                symbol,
                member_subst,
                dispatch.as_ref(),
                extension_receiver.as_ref(),
                call,
                lambdas,
            ),
        }
    }

    fn check_local(
        &self,
        candidate: &CandidateSource,
        ty: &Type,
        call: &Call<'_>,
        lambdas: &mut dyn LambdaAnalyzer,
    ) -> Result<Applicable, Inapplicability> {
        let Type::Function { parameters, .. } = ty else {
            return Err(Inapplicability::TooManyArguments);
        };
        if !call.type_arguments.is_empty() {
            return Err(Inapplicability::WrongNumberOfTypeArguments { expected: 0 });
        }
        if call.arguments.len() > parameters.len() {
            return Err(Inapplicability::TooManyArguments);
        }
        if call.arguments.len() < parameters.len() {
            let position = call.arguments.len() + 1;
            return Err(Inapplicability::NoValueForParameter(Symbol::intern(&format!("p{}", position))));
        }
        let mut argument_types = Vec::with_capacity(parameters.len());
        for (index, (argument, parameter)) in call.arguments.iter().zip(parameters).enumerate() {
            let actual = self.argument_type(argument, parameter, &[], lambdas);
            if !self.table.is_subtype(&actual, parameter) {
                return Err(Inapplicability::TypeMismatch {
                    argument: index,
                    expected: parameter.clone(),
                    actual,
                });
            }
            argument_types.push(parameter.clone());
        }
        Ok(Applicable {
            source: candidate.clone(),
            substitution: Substitution::new(),
            type_arguments: Vec::new(),
            argument_types,
            extension_receiver: None,
            receiver_parameter: None,
            used_vararg: false,
            used_defaults: false,
            generic: false,
            unsafe_receiver: false,
        })
    }

    fn argument_type(
        &self,
        argument: &CallArgument<'_>,
        parameter: &Type,
        variables: &[TypeParamId],
        lambdas: &mut dyn LambdaAnalyzer,
    ) -> Type {
        match argument {
            CallArgument::Value { ty, .. } => ty.clone(),
            CallArgument::Lambda(lambda) => {
                lambdas.lambda_type(lambda, &LambdaExpectation::from_parameter(parameter, variables))
            }
        }
    }

    /// Type variables of a call to `symbol`: its own parameters, plus the
    /// class's own parameters for a constructor.
    fn variables_of(&self, symbol: &CallableSymbol) -> Vec<TypeParamId> {
        let mut variables = symbol.type_parameters.clone();
        if symbol.kind == CallableKind::Constructor {
            if let Some(class) = symbol.containing_class.and_then(|id| self.table.class(id)) {
                variables.extend(class.type_parameters.iter().copied());
            }
        }
        variables
    }

    #[allow(clippy::too_many_arguments)]
    fn check_callable(
        &self,
        candidate: &CandidateSource,
        symbol: &CallableSymbol,
        member_subst: &Substitution,
        dispatch: Option<&Type>,
        extension_receiver: Option<&Type>,
        call: &Call<'_>,
        lambdas: &mut dyn LambdaAnalyzer,
    ) -> Result<Applicable, Inapplicability> {
        let variables = self.variables_of(symbol);
        if !call.type_arguments.is_empty() && call.type_arguments.len() != variables.len() {
            return Err(Inapplicability::WrongNumberOfTypeArguments {
                expected: variables.len(),
            });
        }
        let mapping = map_arguments(&symbol.parameters, call.arguments.len(), call.has_trailing_lambda)?;
        let header = self.table.callable_header(symbol);
        let declared: Vec<Type> = mapping
            .targets
            .iter()
            .map(|(index, _)| {
                header
                    .parameters
                    .get(*index)
                    .map(|t| t.apply_subst(member_subst))
                    .unwrap_or(Type::Error(ErrorKind::Internal))
            })
            .collect();
        let declared_receiver = header.receiver.as_ref().map(|r| r.apply_subst(member_subst));

        let mut unsafe_receiver = false;
        let receiver_argument = extension_receiver.or(dispatch).cloned();
        if let Some(actual) = &receiver_argument {
            if !call.safe && self.table.is_nullable(actual) && declared_receiver.as_ref().map_or(true, |r| !self.table.is_nullable(r)) {
                if extension_receiver.is_some() {
                    return Err(Inapplicability::ReceiverMismatch {
                        expected: declared_receiver.clone().unwrap_or_else(|| self.table.any_type()),
                        actual: actual.clone(),
                    });
                }
                unsafe_receiver = call.receiver.is_some();
            }
        }

        let solution = if variables.is_empty() {
            Substitution::new()
        } else if !call.type_arguments.is_empty() {
            let mut explicit = Substitution::new();
            for (variable, ty) in variables.iter().zip(&call.type_arguments) {
                explicit.insert(*variable, ty.clone());
            }
            explicit
        } else {
            let mut system = ConstraintSystem::new(self.table, variables.clone());
            if let (Some(actual), Some(expected)) = (extension_receiver, &declared_receiver) {
                system.add_subtype(actual, expected);
            }
            for (argument, parameter) in call.arguments.iter().zip(&declared) {
                if let CallArgument::Value { ty, .. } = argument {
                    system.add_subtype(ty, parameter);
                }
            }
            if call.arguments.iter().any(|a| matches!(a, CallArgument::Lambda(_))) {
                let partial = self.partial_solution(&system);
                for (argument, parameter) in call.arguments.iter().zip(&declared) {
                    if let CallArgument::Lambda(_) = argument {
                        let expected = parameter.apply_subst(&partial);
                        let actual = self.argument_type(argument, &expected, &variables, lambdas);
                        system.add_subtype(&actual, parameter);
                    }
                }
            }
            let solution = system.solve();
            self.complete_with_expected(symbol, &variables, &system, solution, member_subst, call)
        };

        for variable in &variables {
            let Some(actual) = solution.lookup(*variable) else {
                continue;
            };
            let bound = self.table.upper_bound(*variable).apply_subst(&solution);
            if !self.table.is_subtype(actual, &bound) {
                return Err(Inapplicability::UpperBoundViolated {
                    parameter: *variable,
                    bound,
                    actual: actual.clone(),
                });
            }
        }

        let substitution = solution.compose(member_subst);
        let argument_types: Vec<Type> = declared.iter().map(|t| t.apply_subst(&solution)).collect();
        let receiver_parameter = declared_receiver.as_ref().map(|r| r.apply_subst(&solution));
        if let (Some(actual), Some(expected)) = (extension_receiver, &receiver_parameter) {
            if !self.table.is_subtype(actual, expected) {
                return Err(Inapplicability::ReceiverMismatch {
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
        }
        for (index, (argument, expected)) in call.arguments.iter().zip(&argument_types).enumerate() {
            let actual = self.argument_type(argument, expected, &[], lambdas);
            if !self.table.is_subtype(&actual, expected) {
                return Err(Inapplicability::TypeMismatch {
                    argument: index,
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(Applicable {
            source: candidate.clone(),
            substitution,
            type_arguments: variables
                .iter()
                .map(|v| solution.lookup(*v).cloned().unwrap_or_else(|| Type::parameter(*v)))
                .collect(),
            argument_types,
            extension_receiver: extension_receiver.cloned(),
            receiver_parameter,
            used_vararg: mapping.used_vararg,
            used_defaults: mapping.used_defaults,
            generic: !variables.is_empty(),
            unsafe_receiver,
        })
    }

    /// Solution restricted to variables some argument already constrains.
    fn partial_solution(&self, system: &ConstraintSystem<'_>) -> Substitution {
        let solved = system.solve();
        let mut partial = Substitution::new();
        for variable in system.variables() {
            if system.is_constrained(*variable) {
                if let Some(ty) = solved.lookup(*variable) {
                    partial.insert(*variable, ty.clone());
                }
            }
        }
        partial
    }

    /// Variables no argument constrained are inferred from the expected type
    /// when the declared return type allows it.
    fn complete_with_expected(
        &self,
        symbol: &CallableSymbol,
        variables: &[TypeParamId],
        system: &ConstraintSystem<'_>,
        solution: Substitution,
        member_subst: &Substitution,
        call: &Call<'_>,
    ) -> Substitution {
        let Some(expected) = &call.expected else {
            return solution;
        };
        if variables.iter().all(|v| system.is_constrained(*v)) {
            return solution;
        }
        let declared_return = match symbol.kind {
            CallableKind::Constructor => symbol
                .containing_class
                .and_then(|id| self.table.class(id))
                .map(|class| self.table.default_type(&class)),
            _ => symbol.return_ref.as_ref().map(|return_ref| {
                let scope = self.table.callable_header_scope(symbol);
                let mut scratch = crate::diagnostics::DiagnosticReporter::new();
                self.table.resolve_type_ref(return_ref, &scope, &mut scratch)
            }),
        };
        let Some(declared_return) = declared_return else {
            return solution;
        };
        let mut refined = ConstraintSystem::new(self.table, variables.to_vec());
        for variable in variables {
            if system.is_constrained(*variable) {
                if let Some(ty) = solution.lookup(*variable) {
                    refined.add_equality(&Type::parameter(*variable), ty);
                }
            }
        }
        refined.add_subtype(&declared_return.apply_subst(member_subst), expected);
        refined.solve()
    }

    // ---- specificity ----

    fn at_least_as_specific(&self, a: &Applicable, b: &Applicable) -> bool {
        let receivers = match (&a.receiver_parameter, &b.receiver_parameter) {
            (Some(x), Some(y)) => self.table.is_subtype(x, y),
            (None, _) => true,
            (Some(_), None) => false,
        };
        receivers
            && a.argument_types
                .iter()
                .zip(&b.argument_types)
                .all(|(x, y)| self.table.is_subtype(x, y))
    }

    fn discriminate(a: &Applicable, b: &Applicable) -> Ordering {
        let key = |c: &Applicable| (!c.used_vararg, !c.used_defaults, !c.generic);
        key(a).cmp(&key(b))
    }

    fn beats(&self, a: &Applicable, b: &Applicable) -> bool {
        if !self.at_least_as_specific(a, b) {
            return false;
        }
        !self.at_least_as_specific(b, a) || Self::discriminate(a, b) == Ordering::Greater
    }

    fn choose(&self, applicable: Vec<Applicable>, call: &Call<'_>) -> Option<CallResolution> {
        if applicable.is_empty() {
            return None;
        }
        let winner = (0..applicable.len()).find(|&i| {
            applicable
                .iter()
                .enumerate()
                .all(|(j, other)| i == j || self.beats(&applicable[i], other))
        });
        match winner {
            Some(index) => {
                let mut applicable = applicable;
                let chosen = applicable.swap_remove(index);
                Some(CallResolution::Success(Box::new(self.complete(chosen, call))))
            }
            None => {
                let mut candidates: Vec<CallableId> = applicable
                    .iter()
                    .filter_map(|a| match a.source.target() {
                        CallTarget::Callable(id) => Some(id),
                        CallTarget::Local(_) => None,
                    })
                    .collect();
                candidates.sort();
                Some(CallResolution::Ambiguity { candidates })
            }
        }
    }

    /// Advances the winner and computes its substituted return type.
    fn complete(&self, chosen: Applicable, call: &Call<'_>) -> ResolvedCall {
        let (return_type, recursive, deprecation, dispatch) = match &chosen.source {
            CandidateSource::Local { ty, .. } => {
                let return_type = match ty {
                    Type::Function { return_type, .. } => return_type.as_ref().clone(),
                    _ => Type::Error(ErrorKind::Internal),
                };
                (return_type, false, None, None)
            }
            CandidateSource::Callable { symbol, dispatch, .. } => {
                let (return_type, recursive) = match self.table.callable_return_type(symbol) {
                    Ok(ty) => (ty.apply_subst(&chosen.substitution), false),
                    Err(AdvanceError::Recursive(key)) => {
                        debug!("return type of {} is recursive", key);
                        (Type::Error(ErrorKind::Recursive), true)
                    }
                };
                (return_type, recursive, self.table.deprecation_of(symbol), dispatch.clone())
            }
        };
        let nullable_result = call.safe && call.receiver.as_ref().is_some_and(|r| self.table.is_nullable(r));
        let return_type = if nullable_result {
            return_type.make_nullable()
        } else {
            return_type
        };
        ResolvedCall {
            target: chosen.source.target(),
            substitution: chosen.substitution,
            type_arguments: chosen.type_arguments,
            argument_types: chosen.argument_types,
            return_type,
            dispatch_receiver: dispatch,
            extension_receiver: chosen.extension_receiver,
            deprecation,
            unsafe_receiver: chosen.unsafe_receiver,
            recursive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::NoCheckpoint;
    use crate::test_support::{class_named, project_with, top_level};
    use kestrel_syntax::builder::SourceBuilder;
    use kestrel_syntax::{DeprecationLevel, TypeRef};

    fn value(ty: Type) -> CallArgument<'static> {
        CallArgument::Value { ty, span: Span::DUMMY }
    }

    fn resolve(table: &SymbolTable, call: &Call<'_>) -> CallResolution {
        CallResolver::new(table, &NoCheckpoint).resolve(call, &mut NoLambdas).unwrap()
    }

    fn target_name(table: &SymbolTable, resolution: &CallResolution) -> String {
        match resolution {
            CallResolution::Success(call) => match call.target {
                CallTarget::Callable(id) => crate::diagnostics::SymbolRenderer::callable_name(table, id),
                CallTarget::Local(name) => name.to_string(),
            },
            other => format!("{:?}", other),
        }
    }

    #[test]
    fn test_most_specific_overload_wins_in_any_order() {
        for reversed in [false, true] {
            let mut builder = SourceBuilder::new("a.kt").package("app");
            let overloads = [("Int", "Int"), ("Number", "Number")];
            let ordered: Vec<_> = if reversed {
                overloads.iter().rev().collect()
            } else {
                overloads.iter().collect()
            };
            for (parameter, returns) in ordered {
                builder = builder.function("f", |f| f.param("x", parameter).returns(returns));
            }
            let (project, module) = project_with(vec![builder]);
            let table = project.table().unwrap();
            let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
            let int = table.builtin_type(table.builtins().int);
            let call = Call::invocation(Symbol::intern("f"), vec![value(int)], &scope);
            let resolution = resolve(&table, &call);
            assert_eq!(target_name(&table, &resolution), "f(Int)");
            assert_eq!(table.render(&resolution.resolved().unwrap().return_type), "Int");

            let double = table.builtin_type(table.builtins().double);
            let call = Call::invocation(Symbol::intern("f"), vec![value(double)], &scope);
            assert_eq!(target_name(&table, &resolve(&table, &call)), "f(Number)");
        }
    }

    #[test]
    fn test_string_beats_any() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("show", |f| f.param("x", "Any"))
            .function("show", |f| f.param("x", "String"))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let string = table.builtin_type(table.builtins().string);
        let call = Call::invocation(Symbol::intern("show"), vec![value(string)], &scope);
        assert_eq!(target_name(&table, &resolve(&table, &call)), "show(String)");
    }

    #[test]
    fn test_discriminators_and_ambiguity() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("pick", |f| f.vararg("xs", "Int"))
            .function("pick", |f| f.param("x", "Int"))
            .function("opt", |f| f.param("x", "Int").param_default("y", "Int", kestrel_syntax::builder::expr::int(0)))
            .function("opt", |f| f.param("x", "Int"))
            .function("gen", |f| f.type_parameter("T").param("x", "T"))
            .function("gen", |f| f.param("x", "Int"))
            .function("same", |f| f.param("x", "Comparable<Int>"))
            .function("same", |f| f.param("x", "Number"))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let int = || value(table.builtin_type(table.builtins().int));

        let pick = resolve(&table, &Call::invocation(Symbol::intern("pick"), vec![int()], &scope));
        let CallTarget::Callable(picked) = pick.resolved().unwrap().target else {
            panic!("expected a callable");
        };
        assert!(!table.callable(picked).unwrap().has_vararg());
        let opt = resolve(&table, &Call::invocation(Symbol::intern("opt"), vec![int()], &scope));
        assert_eq!(target_name(&table, &opt), "opt(Int)");
        let gen = resolve(&table, &Call::invocation(Symbol::intern("gen"), vec![int()], &scope));
        assert_eq!(target_name(&table, &gen), "gen(Int)");
        let same = resolve(&table, &Call::invocation(Symbol::intern("same"), vec![int()], &scope));
        match same {
            CallResolution::Ambiguity { candidates } => assert_eq!(candidates.len(), 2),
            other => panic!("expected ambiguity, got {:?}", other),
        }
    }

    #[test]
    fn test_inapplicable_reasons() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("two", |f| f.param("a", "Int").param("b", "String"))
            .function("bounded", |f| f.type_parameter_bounded("T", &["Number"]).param("x", "T"))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let int = table.builtin_type(table.builtins().int);
        let string = table.builtin_type(table.builtins().string);

        let reason = |resolution: CallResolution| match resolution {
            CallResolution::Unresolved { inapplicable, .. } => inapplicable[0].reason.clone(),
            other => panic!("expected unresolved, got {:?}", other),
        };
        let missing = resolve(&table, &Call::invocation(Symbol::intern("two"), vec![value(int.clone())], &scope));
        assert_eq!(reason(missing), Inapplicability::NoValueForParameter(Symbol::intern("b")));
        let extra = resolve(
            &table,
            &Call::invocation(
                Symbol::intern("two"),
                vec![value(int.clone()), value(string.clone()), value(int.clone())],
                &scope,
            ),
        );
        assert_eq!(reason(extra), Inapplicability::TooManyArguments);
        let swapped = resolve(
            &table,
            &Call::invocation(Symbol::intern("two"), vec![value(string.clone()), value(int.clone())], &scope),
        );
        assert!(matches!(reason(swapped), Inapplicability::TypeMismatch { argument: 0, .. }));
        let bounded = resolve(&table, &Call::invocation(Symbol::intern("bounded"), vec![value(string)], &scope));
        assert!(matches!(reason(bounded), Inapplicability::UpperBoundViolated { .. }));

        let mut explicit = Call::invocation(Symbol::intern("bounded"), vec![value(int.clone())], &scope);
        explicit.type_arguments = vec![int.clone(), int];
        assert_eq!(
            reason(resolve(&table, &explicit)),
            Inapplicability::WrongNumberOfTypeArguments { expected: 1 }
        );
    }

    #[test]
    fn test_trailing_lambda_flag_without_arguments() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("run", |f| f.param("block", "() -> Unit"))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let mut call = Call::invocation(Symbol::intern("run"), vec![], &scope);
        call.has_trailing_lambda = true;
        match resolve(&table, &call) {
            CallResolution::Unresolved { inapplicable, .. } => {
                assert_eq!(inapplicable.len(), 1);
                assert_eq!(inapplicable[0].reason, Inapplicability::NoValueForParameter(Symbol::intern("block")));
            }
            other => panic!("expected unresolved, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_inference_and_expected_type() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app")]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let int = table.builtin_type(table.builtins().int);
        let double = table.builtin_type(table.builtins().double);

        let list = resolve(
            &table,
            &Call::invocation(Symbol::intern("listOf"), vec![value(int.clone()), value(double)], &scope),
        );
        assert_eq!(table.render(&list.resolved().unwrap().return_type), "List<Number>");

        let mut empty = Call::invocation(Symbol::intern("emptyList"), Vec::new(), &scope);
        let mut reporter = crate::diagnostics::DiagnosticReporter::new();
        empty.expected = Some(table.resolve_type_ref(&TypeRef::parse("List<String>").unwrap(), &scope, &mut reporter));
        let empty = resolve(&table, &empty);
        assert_eq!(table.render(&empty.resolved().unwrap().return_type), "List<String>");
    }

    #[test]
    fn test_receiver_members_and_extensions() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Box", |c| c.type_parameter("T").val_param("item", "T").function("get", |f| f.returns("T")))
            .function("second", |f| f.type_parameter("E").receiver("List<E>").returns("E"))
            .function("shout", |f| f.receiver("String").returns("String"))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let int = table.builtin_type(table.builtins().int);
        let boxed = class_named(&table, module, "app.Box");
        let box_of_int = Type::simple(boxed.id, vec![int.clone()]);

        let get = resolve(&table, &Call::invocation(Symbol::intern("get"), Vec::new(), &scope).with_receiver(box_of_int.clone(), false));
        assert_eq!(table.render(&get.resolved().unwrap().return_type), "Int");
        let item = resolve(&table, &Call::property(Symbol::intern("item"), Some(box_of_int.clone()), &scope));
        assert_eq!(table.render(&item.resolved().unwrap().return_type), "Int");

        let safe = resolve(
            &table,
            &Call::invocation(Symbol::intern("get"), Vec::new(), &scope).with_receiver(box_of_int.make_nullable(), true),
        );
        assert_eq!(table.render(&safe.resolved().unwrap().return_type), "Int?");
        let unsafe_call = resolve(
            &table,
            &Call::invocation(Symbol::intern("get"), Vec::new(), &scope).with_receiver(box_of_int.make_nullable(), false),
        );
        assert!(unsafe_call.resolved().unwrap().unsafe_receiver);

        let mut reporter = crate::diagnostics::DiagnosticReporter::new();
        let list_of_int = table.resolve_type_ref(&TypeRef::parse("List<Int>").unwrap(), &scope, &mut reporter);
        let second = resolve(&table, &Call::invocation(Symbol::intern("second"), Vec::new(), &scope).with_receiver(list_of_int, false));
        assert_eq!(table.render(&second.resolved().unwrap().return_type), "Int");
        let shout = resolve(&table, &Call::invocation(Symbol::intern("shout"), Vec::new(), &scope).with_receiver(int, false));
        assert!(matches!(
            shout,
            CallResolution::Unresolved { ref inapplicable, .. }
                if matches!(inapplicable[0].reason, Inapplicability::ReceiverMismatch { .. })
        ));
    }

    #[test]
    fn test_hidden_and_invisible_candidates() {
        let (project, module) = project_with(vec![
            SourceBuilder::new("a.kt")
                .package("app")
                .function("gone", |f| f.deprecated(DeprecationLevel::Hidden, "removed"))
                .function("old", |f| f.deprecated(DeprecationLevel::Warning, "use new"))
                .function("secret", |f| f.private()),
            SourceBuilder::new("b.kt").package("app"),
        ]);
        let table = project.table().unwrap();
        let units = table.units_of(module);
        let scope_a = table.unit_scope(units[0].id()).unwrap();
        let scope_b = table.unit_scope(units[1].id()).unwrap();

        let gone = resolve(&table, &Call::invocation(Symbol::intern("gone"), Vec::new(), &scope_a));
        assert_eq!(
            gone,
            CallResolution::Unresolved {
                inapplicable: Vec::new(),
                invisible: Vec::new()
            }
        );
        let old = resolve(&table, &Call::invocation(Symbol::intern("old"), Vec::new(), &scope_a));
        assert_eq!(
            old.resolved().unwrap().deprecation.as_ref().map(|d| d.level),
            Some(DeprecationLevel::Warning)
        );
        let secret = top_level(&table, module, "app", "secret");
        assert!(resolve(&table, &Call::invocation(Symbol::intern("secret"), Vec::new(), &scope_a))
            .resolved()
            .is_some());
        let hidden = resolve(&table, &Call::invocation(Symbol::intern("secret"), Vec::new(), &scope_b));
        assert_eq!(
            hidden,
            CallResolution::Unresolved {
                inapplicable: Vec::new(),
                invisible: vec![secret.id]
            }
        );
    }

    #[test]
    fn test_constructors_and_inner_levels_shadow_outer() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Box", |c| c.type_parameter("T").param("item", "T"))
            .function("size", |f| f.returns("String"))
            .class("Holder", |c| c.function("size", |f| f.returns("Int")))]);
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let string = table.builtin_type(table.builtins().string);

        let boxed = resolve(&table, &Call::invocation(Symbol::intern("Box"), vec![value(string)], &scope));
        assert_eq!(table.render(&boxed.resolved().unwrap().return_type), "Box<String>");

        let holder = class_named(&table, module, "app.Holder");
        let body = table.class_body_scope(&holder);
        let size = resolve(&table, &Call::invocation(Symbol::intern("size"), Vec::new(), &body));
        assert_eq!(table.render(&size.resolved().unwrap().return_type), "Int");
        let top = resolve(&table, &Call::invocation(Symbol::intern("size"), Vec::new(), &scope));
        assert_eq!(table.render(&top.resolved().unwrap().return_type), "String");
    }

    #[test]
    fn test_failed_module_is_a_configuration_error() {
        let (project, module) = crate::test_support::project_with_missing_dependency();
        let table = project.table().unwrap();
        let scope = table.unit_scope(table.units_of(module)[0].id()).unwrap();
        let error = CallResolver::new(&table, &NoCheckpoint)
            .resolve(&Call::invocation(Symbol::intern("println"), Vec::new(), &scope), &mut NoLambdas)
            .unwrap_err();
        assert!(matches!(error, ResolutionError::Configuration(_)));
    }
}
