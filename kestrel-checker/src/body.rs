//! Body resolution.
//!
//! Walks the body of one function or property (plus its parameter default
//! values), giving every expression a type and every name or call a
//! resolved target. Calls go through [`CallResolver`]; lambda arguments are
//! typed speculatively per candidate and recorded once against the winner.

use crate::call_resolver::{
    Call, CallArgument, CallResolution, CallResolver, CallTarget, Inapplicability, InapplicableCandidate,
    LambdaAnalyzer, LambdaArgument, LambdaExpectation,
};
use crate::diagnostics::{Diagnostic, DiagnosticArg, DiagnosticKind, DiagnosticReporter, ElementRanges};
use crate::lifetime::NoCheckpoint;
use crate::scope::{ScopeChain, ScopeLevel};
use crate::symbol_table::{ClassifierRef, SymbolTable};
use crate::symbols::{CallableId, CallableSymbol, ClassId, SourceCallable};
use crate::types::{ErrorKind, Type};
use kestrel_syntax::symbols::IT;
use kestrel_syntax::{
    CallExpr, ClassDecl, Deprecated, DeprecationLevel, Expr, ExprId, ExprKind, LambdaExpr, Literal, QualifiedName,
    Span, Statement, Symbol, Visibility,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error};

/// What a name or call expression refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolvedReference {
    Callable(CallableId),
    Classifier(ClassId),
    Local(Symbol),
}

#[derive(Debug, Clone)]
pub struct BodyResolution {
    pub expression_types: HashMap<ExprId, Type>,
    pub references: HashMap<ExprId, ResolvedReference>,
    pub diagnostics: Vec<Diagnostic>,
    /// Type of an expression body or initializer; `Unit` for block bodies.
    pub result_type: Type,
}

impl BodyResolution {
    pub fn type_of(&self, expr: ExprId) -> Option<&Type> {
        self.expression_types.get(&expr)
    }

    pub fn reference_of(&self, expr: ExprId) -> Option<ResolvedReference> {
        self.references.get(&expr).copied()
    }
}

/// Resolve the body of `callable`. `expected` is the declared return type of
/// an expression body or the declared type of an initialized property.
#[tracing::instrument(level = "debug", skip_all, fields(callable = %callable.id))]
pub fn resolve_callable_body(table: &SymbolTable, callable: &CallableSymbol, expected: Option<&Type>) -> BodyResolution {
    let mut analyzer = BodyAnalyzer::new(table, callable.id);
    let Some(source) = callable.source() else {
        return analyzer.finish(table.unit_type());
    };
    let scope = table.callable_body_scope(callable);

    let header = table.callable_header(callable);
    let with_defaults = callable
        .parameters
        .iter()
        .zip(&header.parameters)
        .filter(|(parameter, _)| parameter.has_default)
        .map(|(_, ty)| ty);
    for (ty, default) in with_defaults.zip(source.default_values()) {
        analyzer.check_expr(default, &scope, ty);
    }

    let block_body = matches!(source, SourceCallable::Function(f) if f.has_block_body());
    let result_type = match source.body() {
        Some(body) if block_body => {
            analyzer.expr(body, &scope, None);
            table.unit_type()
        }
        Some(body) => match expected {
            Some(expected) => analyzer.check_expr(body, &scope, expected),
            None => analyzer.expr(body, &scope, None),
        },
        None => table.unit_type(),
    };
    debug!(
        "resolved body of {} with {} diagnostics",
        callable.id,
        analyzer.reporter.len()
    );
    analyzer.finish(result_type)
}

fn visibility_text(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::Private => "private",
        Visibility::Protected => "protected",
        Visibility::Internal => "internal",
        Visibility::Public => "public",
    }
}

fn target_arg(target: CallTarget) -> DiagnosticArg {
    match target {
        CallTarget::Callable(id) => DiagnosticArg::Callable(id),
        CallTarget::Local(name) => DiagnosticArg::Name(name),
    }
}

struct BodyAnalyzer<'t> {
    table: &'t SymbolTable,
    owner: CallableId,
    types: HashMap<ExprId, Type>,
    references: HashMap<ExprId, ResolvedReference>,
    reporter: DiagnosticReporter,
}

/// Types lambdas for the resolver in a throwaway analyzer.
struct DryRun<'a, 't> {
    analyzer: &'a BodyAnalyzer<'t>,
    scope: &'a ScopeChain,
}

impl LambdaAnalyzer for DryRun<'_, '_> {
    fn lambda_type(&mut self, lambda: &LambdaArgument<'_>, expectation: &LambdaExpectation) -> Type {
        let mut scratch = self.analyzer.scratch();
        scratch.lambda(lambda.lambda, self.scope, expectation)
    }
}

impl<'t> BodyAnalyzer<'t> {
    fn new(table: &'t SymbolTable, owner: CallableId) -> Self {
        BodyAnalyzer {
            table,
            owner,
            types: HashMap::new(),
            references: HashMap::new(),
            reporter: DiagnosticReporter::new(),
        }
    }

    fn scratch(&self) -> BodyAnalyzer<'t> {
        BodyAnalyzer::new(self.table, self.owner)
    }

    fn finish(self, result_type: Type) -> BodyResolution {
        BodyResolution {
            expression_types: self.types,
            references: self.references,
            diagnostics: self.reporter.into_diagnostics(),
            result_type,
        }
    }

    /// Type `expr` and report a mismatch against `expected`.
    fn check_expr(&mut self, expr: &Expr, scope: &ScopeChain, expected: &Type) -> Type {
        let actual = self.expr(expr, scope, Some(expected));
        if !self.table.is_subtype(&actual, expected) {
            self.reporter.report_at(
                DiagnosticKind::TypeMismatch,
                expr.span,
                vec![DiagnosticArg::Type(expected.clone()), DiagnosticArg::Type(actual.clone())],
            );
        }
        actual
    }

    fn expr(&mut self, expr: &Expr, scope: &ScopeChain, expected: Option<&Type>) -> Type {
        let ty = match &expr.kind {
            ExprKind::Literal { value } => self.literal(value, expected),
            ExprKind::Name { name } => self.name(expr, *name, scope),
            ExprKind::This => self.this(expr, scope),
            ExprKind::Member {
                receiver,
                safe,
                name,
                name_span,
            } => {
                let receiver_type = self.expr(receiver, scope, None);
                let call = Call::property(*name, None, scope).with_receiver(receiver_type, *safe);
                self.resolve_call(expr, &call, *name_span)
            }
            ExprKind::Call(call) => self.call(expr, call, scope, expected),
            ExprKind::Lambda(lambda) => {
                let expectation = expected
                    .map(|e| LambdaExpectation::from_parameter(e, &[]))
                    .unwrap_or_default();
                self.lambda(lambda, scope, &expectation)
            }
            ExprKind::Block { statements } => self.block(statements, scope, expected),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let boolean = self.table.builtin_type(self.table.builtins().boolean);
                self.check_expr(condition, scope, &boolean);
                let then_type = self.expr(then_branch, scope, expected);
                match else_branch {
                    Some(else_branch) => {
                        let else_type = self.expr(else_branch, scope, expected);
                        self.table.common_supertype(&[then_type, else_type])
                    }
                    None => self.table.unit_type(),
                }
            }
        };
        self.types.insert(expr.id, ty.clone());
        ty
    }

    fn literal(&self, value: &Literal, expected: Option<&Type>) -> Type {
        let builtins = self.table.builtins();
        let class = match value {
            Literal::Int(_) => {
                let long = self.table.builtin_type(builtins.long);
                if expected.is_some_and(|e| e.make_not_null() == long) {
                    builtins.long
                } else {
                    builtins.int
                }
            }
            Literal::Long(_) => builtins.long,
            Literal::Double(_) => builtins.double,
            Literal::String(_) => builtins.string,
            Literal::Char(_) => builtins.char,
            Literal::Boolean(_) => builtins.boolean,
            Literal::Null => return self.table.nothing_type().make_nullable(),
        };
        self.table.builtin_type(class)
    }

    fn name(&mut self, expr: &Expr, name: Symbol, scope: &ScopeChain) -> Type {
        if let Some(local) = scope.local(name) {
            self.references.insert(expr.id, ResolvedReference::Local(name));
            return local.ty.clone();
        }
        let call = Call::property(name, None, scope);
        let outcome = self.run(&call);
        let nothing_matched = matches!(
            outcome,
            Ok(CallResolution::Unresolved { ref inapplicable, ref invisible })
                if inapplicable.is_empty() && invisible.is_empty()
        );
        if nothing_matched {
            if let Some(ty) = self.object_reference(expr, name, scope) {
                return ty;
            }
        }
        self.apply_resolution(expr, &call, expr.span, outcome)
    }

    /// A bare name that denotes an object declaration.
    fn object_reference(&mut self, expr: &Expr, name: Symbol, scope: &ScopeChain) -> Option<Type> {
        let ClassifierRef::Class(id) = self.table.lookup_classifier(&QualifiedName::single(name), scope)? else {
            return None;
        };
        if !self.table.is_object(id) {
            return None;
        }
        let class = self.table.class(id)?;
        self.references.insert(expr.id, ResolvedReference::Classifier(id));
        if let Some(deprecation) = self.table.class_deprecation(&class) {
            self.report_deprecation(name, &deprecation, &ElementRanges::new(expr.span));
        }
        Some(self.table.default_type(&class))
    }

    fn this(&mut self, expr: &Expr, scope: &ScopeChain) -> Type {
        match scope.implicit_receivers().into_iter().next() {
            Some((receiver, _)) => receiver,
            None => {
                self.reporter.report_at(
                    DiagnosticKind::UnresolvedReference,
                    expr.span,
                    vec![DiagnosticArg::Name(kestrel_syntax::symbols::THIS())],
                );
                Type::Error(ErrorKind::Unresolved)
            }
        }
    }

    fn call(&mut self, expr: &Expr, call_expr: &CallExpr, scope: &ScopeChain, expected: Option<&Type>) -> Type {
        let receiver = call_expr.receiver.as_ref().map(|r| self.expr(r, scope, None));
        let mut arguments = Vec::with_capacity(call_expr.arguments.len() + 1);
        for argument in call_expr.arguments.iter().chain(call_expr.trailing_lambda.as_deref()) {
            arguments.push(self.argument(argument, scope));
        }
        let type_arguments = call_expr
            .type_arguments
            .iter()
            .map(|r| self.table.resolve_type_ref(r, scope, &mut self.reporter))
            .collect();

        let mut call = Call::invocation(call_expr.callee, arguments, scope);
        call.has_trailing_lambda = call_expr.trailing_lambda.is_some();
        call.type_arguments = type_arguments;
        call.expected = expected.cloned();
        if let Some(receiver) = receiver {
            call = call.with_receiver(receiver, call_expr.safe);
        }
        self.resolve_call(expr, &call, call_expr.callee_span)
    }

    fn argument<'e>(&mut self, argument: &'e Expr, scope: &ScopeChain) -> CallArgument<'e> {
        match &argument.kind {
            ExprKind::Lambda(lambda) => CallArgument::Lambda(LambdaArgument { expr: argument, lambda }),
            _ => CallArgument::Value {
                ty: self.expr(argument, scope, None),
                span: argument.span,
            },
        }
    }

    fn run(&self, call: &Call<'_>) -> crate::error::ResolutionResult<CallResolution> {
        let mut lambdas = DryRun {
            analyzer: self,
            scope: call.scope,
        };
        CallResolver::new(self.table, &NoCheckpoint).resolve(call, &mut lambdas)
    }

    /// Resolve `call`, record its target, report its problems and type its lambdas.
    fn resolve_call(&mut self, expr: &Expr, call: &Call<'_>, reference: Span) -> Type {
        let outcome = self.run(call);
        self.apply_resolution(expr, call, reference, outcome)
    }

    fn apply_resolution(
        &mut self,
        expr: &Expr,
        call: &Call<'_>,
        reference: Span,
        outcome: crate::error::ResolutionResult<CallResolution>,
    ) -> Type {
        let ranges = ElementRanges::new(expr.span)
            .with_reference(reference)
            .with_operator(reference);
        let resolution = match outcome {
            Ok(resolution) => resolution,
            Err(failure) => {
                error!("call resolution failed for {}: {}", call.name, failure);
                self.reporter.report_at(
                    DiagnosticKind::InternalError,
                    expr.span,
                    vec![
                        DiagnosticArg::Text("call resolution".to_string()),
                        DiagnosticArg::Text(failure.to_string()),
                    ],
                );
                return Type::Error(ErrorKind::Internal);
            }
        };

        let (ty, parameter_types) = match resolution {
            CallResolution::Success(resolved) => {
                let target = match resolved.target {
                    CallTarget::Callable(id) => ResolvedReference::Callable(id),
                    CallTarget::Local(name) => ResolvedReference::Local(name),
                };
                self.references.insert(expr.id, target);
                if resolved.unsafe_receiver {
                    let receiver = call.receiver.clone().unwrap_or(Type::Error(ErrorKind::Internal));
                    self.reporter
                        .report_default(DiagnosticKind::UnsafeCall, &ranges, vec![DiagnosticArg::Type(receiver)]);
                }
                if let Some(deprecation) = &resolved.deprecation {
                    self.report_deprecation(call.name, deprecation, &ranges);
                }
                if resolved.recursive {
                    self.reporter.report_at(
                        DiagnosticKind::RecursiveTypeProblem,
                        reference,
                        vec![DiagnosticArg::Name(call.name)],
                    );
                }
                (resolved.return_type, Some(resolved.argument_types))
            }
            CallResolution::Ambiguity { candidates } => {
                self.reporter.report_default(
                    DiagnosticKind::OverloadResolutionAmbiguity,
                    &ranges,
                    vec![DiagnosticArg::Candidates(candidates)],
                );
                (Type::Error(ErrorKind::Ambiguous), None)
            }
            CallResolution::Unresolved { inapplicable, invisible } => {
                let kind = self.report_unresolved(call, &inapplicable, &invisible, &ranges);
                (Type::Error(kind), None)
            }
        };

        for (index, argument) in call.arguments.iter().enumerate() {
            if let CallArgument::Lambda(lambda) = argument {
                let expectation = parameter_types
                    .as_ref()
                    .and_then(|types| types.get(index))
                    .map(|t| LambdaExpectation::from_parameter(t, &[]))
                    .unwrap_or_default();
                let lambda_type = self.lambda(lambda.lambda, call.scope, &expectation);
                self.types.insert(lambda.expr.id, lambda_type);
            }
        }
        ty
    }

    fn report_unresolved(
        &mut self,
        call: &Call<'_>,
        inapplicable: &[InapplicableCandidate],
        invisible: &[CallableId],
        ranges: &ElementRanges,
    ) -> ErrorKind {
        let name = DiagnosticArg::Name(call.name);
        match inapplicable {
            [] => {
                match invisible.first().and_then(|id| self.table.callable(*id)) {
                    Some(hidden) => {
                        let visibility = self.table.callable_status(&hidden).visibility;
                        self.reporter.report_default(
                            DiagnosticKind::InvisibleReference,
                            ranges,
                            vec![name, DiagnosticArg::Text(visibility_text(visibility).to_string())],
                        );
                    }
                    None => self
                        .reporter
                        .report_default(DiagnosticKind::UnresolvedReference, ranges, vec![name]),
                }
                ErrorKind::Unresolved
            }
            [single] => {
                self.report_inapplicable(call, single, ranges);
                ErrorKind::Inapplicable
            }
            several => {
                let candidates = several
                    .iter()
                    .filter_map(|c| match c.target {
                        CallTarget::Callable(id) => Some(id),
                        CallTarget::Local(_) => None,
                    })
                    .collect();
                self.reporter.report_default(
                    DiagnosticKind::NoneApplicable,
                    ranges,
                    vec![DiagnosticArg::Candidates(candidates)],
                );
                ErrorKind::Inapplicable
            }
        }
    }

    fn report_inapplicable(&mut self, call: &Call<'_>, candidate: &InapplicableCandidate, ranges: &ElementRanges) {
        match &candidate.reason {
            Inapplicability::TooManyArguments => self.reporter.report_default(
                DiagnosticKind::TooManyArguments,
                ranges,
                vec![target_arg(candidate.target)],
            ),
            Inapplicability::NoValueForParameter(parameter) => self.reporter.report_default(
                DiagnosticKind::NoValueForParameter,
                ranges,
                vec![DiagnosticArg::Name(*parameter)],
            ),
            Inapplicability::WrongNumberOfTypeArguments { expected } => self.reporter.report_default(
                DiagnosticKind::WrongNumberOfTypeArguments,
                ranges,
                vec![DiagnosticArg::Count(*expected), target_arg(candidate.target)],
            ),
            Inapplicability::TypeMismatch {
                argument,
                expected,
                actual,
            } => {
                let span = call.arguments.get(*argument).map(|a| a.span()).unwrap_or(ranges.element);
                self.reporter.report_at(
                    DiagnosticKind::TypeMismatch,
                    span,
                    vec![DiagnosticArg::Type(expected.clone()), DiagnosticArg::Type(actual.clone())],
                );
            }
            Inapplicability::UpperBoundViolated { bound, actual, .. } => self.reporter.report_default(
                DiagnosticKind::UpperBoundViolated,
                ranges,
                vec![DiagnosticArg::Type(bound.clone()), DiagnosticArg::Type(actual.clone())],
            ),
            Inapplicability::ReceiverMismatch { .. } => self.reporter.report_default(
                DiagnosticKind::UnresolvedReference,
                ranges,
                vec![DiagnosticArg::Name(call.name)],
            ),
        }
    }

    fn report_deprecation(&mut self, name: Symbol, deprecation: &Deprecated, ranges: &ElementRanges) {
        let kind = match deprecation.level {
            DeprecationLevel::Warning if self.table.config().report_deprecations => DiagnosticKind::Deprecation,
            DeprecationLevel::Warning => return,
            DeprecationLevel::Error => DiagnosticKind::DeprecationError,
            // Hidden declarations never win resolution.
            DeprecationLevel::Hidden => return,
        };
        self.reporter.report_default(
            kind,
            ranges,
            vec![DiagnosticArg::Name(name), DiagnosticArg::Text(deprecation.message.clone())],
        );
    }

    fn lambda(&mut self, lambda: &LambdaExpr, scope: &ScopeChain, expectation: &LambdaExpectation) -> Type {
        let mut inner = scope.clone();
        if let Some(receiver) = &expectation.receiver {
            inner = inner.push(ScopeLevel::Receiver(receiver.clone()));
        }
        let expected_parameters = expectation.parameters.as_deref();
        let parameters = match &lambda.parameters {
            Some(declared) => {
                let mut types = Vec::with_capacity(declared.len());
                for (index, parameter) in declared.iter().enumerate() {
                    let ty = match &parameter.type_ref {
                        Some(type_ref) => self.table.resolve_type_ref(type_ref, scope, &mut self.reporter),
                        None => expected_parameters
                            .and_then(|p| p.get(index))
                            .cloned()
                            .unwrap_or(Type::Error(ErrorKind::Uninferred)),
                    };
                    inner = inner.with_local(parameter.name, ty.clone(), lambda.body.span);
                    types.push(ty);
                }
                types
            }
            None => match expected_parameters {
                Some([single]) => {
                    inner = inner.with_local(IT(), single.clone(), lambda.body.span);
                    vec![single.clone()]
                }
                Some(several) => several.to_vec(),
                None => Vec::new(),
            },
        };

        let unit = self.table.unit_type();
        let expected_return = expectation.return_type.as_ref();
        let body_type = self.expr(&lambda.body, &inner, expected_return);
        let return_type = match expected_return {
            Some(r) if *r == unit => unit,
            _ => body_type,
        };
        Type::Function {
            parameters,
            receiver: expectation.receiver.clone().map(Box::new),
            return_type: Box::new(return_type),
            context_receivers: Vec::new(),
            is_suspend: false,
            nullable: false,
        }
    }

    fn block(&mut self, statements: &[Statement], scope: &ScopeChain, expected: Option<&Type>) -> Type {
        let mut scope = scope.clone();
        let mut result = self.table.unit_type();
        let last = statements.len().saturating_sub(1);
        for (index, statement) in statements.iter().enumerate() {
            result = self.table.unit_type();
            match statement {
                Statement::Local(local) => {
                    let declared = local
                        .type_ref
                        .as_ref()
                        .map(|r| self.table.resolve_type_ref(r, &scope, &mut self.reporter));
                    let ty = match declared {
                        Some(declared) => {
                            self.check_expr(&local.initializer, &scope, &declared);
                            declared
                        }
                        None => self.expr(&local.initializer, &scope, None),
                    };
                    scope = scope.with_local(local.name, ty, local.span);
                }
                Statement::Class(decl) => {
                    if let Some(class) = self.local_class(decl) {
                        scope = scope.push(ScopeLevel::LocalClass { name: decl.name, class });
                        let diagnostics = crate::checker::class_tree_diagnostics(self.table, class);
                        self.reporter.extend(diagnostics);
                    }
                }
                Statement::Expression(e) => {
                    let hint = if index == last { expected } else { None };
                    result = self.expr(e, &scope, hint);
                }
            }
        }
        result
    }

    fn local_class(&self, decl: &ClassDecl) -> Option<ClassId> {
        let provider = self.table.provider_of(self.owner.module)?;
        provider.local_classes(self.owner).into_iter().find(|id| {
            self.table
                .class(*id)
                .and_then(|c| c.declaration().map(|d| d.span == decl.span))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project_with, top_level};
    use kestrel_syntax::builder::{expr, SourceBuilder};
    use std::sync::Arc;

    fn body_of(table: &SymbolTable, callable: &CallableSymbol) -> Arc<BodyResolution> {
        table.callable_body(callable).unwrap().unwrap()
    }

    fn kinds(resolution: &BodyResolution) -> Vec<DiagnosticKind> {
        resolution.diagnostics.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_member_call_types_and_references() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").function("next", |f| {
            f.param("x", "Int")
                .body(expr::call_on(expr::name("x"), "plus", vec![expr::int(1)]))
        })]);
        let table = project.table().unwrap();
        let next = top_level(&table, module, "app", "next");
        assert_eq!(table.render(&table.callable_return_type(&next).unwrap()), "Int");

        let body = body_of(&table, &next);
        assert!(body.diagnostics.is_empty(), "{:?}", body.diagnostics);
        let call = next.source().and_then(|s| s.body()).unwrap();
        assert!(matches!(body.reference_of(call.id), Some(ResolvedReference::Callable(_))));
        let receiver = call.children()[0];
        assert_eq!(
            body.reference_of(receiver.id),
            Some(ResolvedReference::Local(Symbol::intern("x")))
        );
    }

    #[test]
    fn test_trailing_lambda_sees_it() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("transform", |f| {
                f.type_parameter("T")
                    .type_parameter("R")
                    .param("value", "T")
                    .param("f", "(T) -> R")
                    .returns("R")
            })
            .function("use", |f| {
                f.body(expr::with_trailing_lambda(
                    expr::call("transform", vec![expr::int(1)]),
                    expr::lambda_it(expr::call_on(expr::name("it"), "toDouble", vec![])),
                ))
            })]);
        let table = project.table().unwrap();
        let user = top_level(&table, module, "app", "use");
        assert_eq!(table.render(&table.callable_return_type(&user).unwrap()), "Double");
        let body = body_of(&table, &user);
        assert!(body.diagnostics.is_empty(), "{:?}", body.diagnostics);
        let lambda_type = body
            .expression_types
            .values()
            .find(|t| matches!(t, Type::Function { .. }))
            .unwrap();
        assert_eq!(table.render(lambda_type), "(Int) -> Double");
    }

    #[test]
    fn test_mismatch_and_unresolved() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("text", |f| f.returns("String").body(expr::int(1)))
            .function("missing", |f| f.body(expr::call("nowhere", vec![])))]);
        let table = project.table().unwrap();
        let text = top_level(&table, module, "app", "text");
        assert_eq!(kinds(&body_of(&table, &text)), vec![DiagnosticKind::TypeMismatch]);
        let missing = top_level(&table, module, "app", "missing");
        assert_eq!(kinds(&body_of(&table, &missing)), vec![DiagnosticKind::UnresolvedReference]);
        assert!(table.callable_return_type(&missing).unwrap().is_error());
    }

    #[test]
    fn test_bare_names_resolve_to_properties_and_objects() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .object("Registry", |c| c)
            .property("limit", |p| p.ty("Int").initializer(expr::int(3)))
            .property("a", |p| p.initializer(expr::name("limit")))
            .property("b", |p| p.initializer(expr::name("Registry")))
            .property("c", |p| p.initializer(expr::name("nowhere")))]);
        let table = project.table().unwrap();

        let a = body_of(&table, &top_level(&table, module, "app", "a"));
        assert_eq!(table.render(&a.result_type), "Int");
        assert!(a.references.values().any(|r| matches!(r, ResolvedReference::Callable(_))));
        assert!(a.diagnostics.is_empty());

        let b = body_of(&table, &top_level(&table, module, "app", "b"));
        assert_eq!(table.render(&b.result_type), "Registry");
        assert!(b.references.values().any(|r| matches!(r, ResolvedReference::Classifier(_))));

        let c = body_of(&table, &top_level(&table, module, "app", "c"));
        assert_eq!(kinds(&c), vec![DiagnosticKind::UnresolvedReference]);
        assert!(c.references.is_empty());
    }

    #[test]
    fn test_if_joins_branches() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").property("p", |p| {
            p.initializer(expr::if_(
                expr::boolean(true),
                expr::int(1),
                Some(expr::double(2.0)),
            ))
        })]);
        let table = project.table().unwrap();
        let p = top_level(&table, module, "app", "p");
        assert_eq!(table.render(&table.callable_return_type(&p).unwrap()), "Number");
    }

    #[test]
    fn test_block_locals_and_unsafe_call() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").function("run", |f| {
            f.param("s", "String?").body(expr::block(vec![
                expr::local("n", Some(kestrel_syntax::TypeRef::parse("Int").unwrap()), expr::string("no")),
                expr::stmt(expr::member(expr::name("s"), "length")),
                expr::stmt(expr::safe_member(expr::name("s"), "length")),
            ]))
        })]);
        let table = project.table().unwrap();
        let run = top_level(&table, module, "app", "run");
        let body = body_of(&table, &run);
        assert_eq!(kinds(&body), vec![DiagnosticKind::TypeMismatch, DiagnosticKind::UnsafeCall]);
        let types: Vec<String> = body.expression_types.values().map(|t| table.render(t)).collect();
        assert!(types.contains(&"Int?".to_string()));
    }

    #[test]
    fn test_deprecations_follow_config() {
        let source = || {
            SourceBuilder::new("a.kt")
                .package("app")
                .function("old", |f| f.deprecated(DeprecationLevel::Warning, "use new"))
                .function("gone", |f| f.deprecated(DeprecationLevel::Error, "removed"))
                .function("caller", |f| {
                    f.body(expr::block(vec![
                        expr::stmt(expr::call("old", vec![])),
                        expr::stmt(expr::call("gone", vec![])),
                    ]))
                })
        };
        let (project, module) = project_with(vec![source()]);
        let table = project.table().unwrap();
        let caller = top_level(&table, module, "app", "caller");
        assert_eq!(
            kinds(&body_of(&table, &caller)),
            vec![DiagnosticKind::Deprecation, DiagnosticKind::DeprecationError]
        );

        let (mut project, module) = project_with(vec![source()]);
        project.configure(|config| config.report_deprecations = false);
        let table = project.table().unwrap();
        let caller = top_level(&table, module, "app", "caller");
        assert_eq!(kinds(&body_of(&table, &caller)), vec![DiagnosticKind::DeprecationError]);
    }

    #[test]
    fn test_mutual_inference_is_recursive() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .function("a", |f| f.body(expr::call("b", vec![])))
            .function("b", |f| f.body(expr::call("a", vec![])))]);
        let table = project.table().unwrap();
        let a = top_level(&table, module, "app", "a");
        let b = top_level(&table, module, "app", "b");
        assert!(table.callable_return_type(&a).unwrap().is_error());
        assert!(table.callable_return_type(&b).unwrap().is_error());
        let recursive: usize = [&a, &b]
            .iter()
            .map(|c| {
                kinds(&body_of(&table, c))
                    .into_iter()
                    .filter(|k| *k == DiagnosticKind::RecursiveTypeProblem)
                    .count()
            })
            .sum();
        assert_eq!(recursive, 1);
        let reported = [&a, &b]
            .iter()
            .flat_map(|c| body_of(&table, c).diagnostics.clone())
            .find(|d| d.kind == DiagnosticKind::RecursiveTypeProblem)
            .unwrap();
        assert!(!reported.range.is_dummy());
        assert_eq!(reported.parameters.len(), 1);
    }
}
