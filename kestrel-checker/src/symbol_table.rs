//! The symbol table of one project generation.
//!
//! A table is built for every project mutation and shared read-only by all
//! sessions of that generation. Symbols are advanced through their phases on
//! demand: `ensure_*_phase` returns immediately once a symbol has reached the
//! requested phase and otherwise takes the symbol's advancement lock and runs
//! the missing steps in order, publishing each step's result before raising
//! the phase. Results that only need name lookup (type-parameter bounds,
//! callable headers) are memoized without a lock.

use crate::body::{resolve_callable_body, BodyResolution};
use crate::builtins::BUILTINS_PACKAGE;
use crate::config::AnalysisConfig;
use crate::diagnostics::{DiagnosticArg, DiagnosticKind, DiagnosticReporter, ElementRanges, SymbolRenderer};
use crate::error::ConfigurationError;
use crate::members::MemberScope;
use crate::modules::ModuleData;
use crate::phases::{AdvanceError, PhaseLocks, SymbolKey};
use crate::providers::SymbolProvider;
use crate::scope::{ScopeChain, ScopeLevel};
use crate::symbols::*;
use crate::types::{ErrorKind, NameRenderer, Type, TypeProjection};
use dashmap::DashMap;
use kestrel_syntax::{
    symbols, FileId, Modality, QualifiedName, SourceUnit, Symbol, TypeArgumentRef, TypeRef, TypeRefKind,
    Visibility,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// One registered module as seen by a table generation.
#[derive(Debug, Clone)]
pub struct ModuleEntry {
    pub data: Arc<ModuleData>,
    pub provider: Arc<dyn SymbolProvider>,
    /// Modules whose declarations this module sees, itself first.
    pub visible: Arc<Vec<ModuleId>>,
    pub failure: Option<ConfigurationError>,
}

/// Ids of the builtin classifiers the analysis refers to directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinClasses {
    pub any: ClassId,
    pub nothing: ClassId,
    pub unit: ClassId,
    pub number: ClassId,
    pub int: ClassId,
    pub long: ClassId,
    pub double: ClassId,
    pub char: ClassId,
    pub string: ClassId,
    pub boolean: ClassId,
    pub array: ClassId,
}

/// A classifier found by name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassifierRef {
    Class(ClassId),
    TypeParameter(TypeParamId),
}

pub struct SymbolTable {
    generation: u64,
    config: Arc<AnalysisConfig>,
    modules: HashMap<ModuleId, ModuleEntry>,
    units: HashMap<FileId, (ModuleId, Arc<SourceUnit>)>,
    builtins: BuiltinClasses,
    default_imports: Vec<QualifiedName>,
    pub(crate) locks: PhaseLocks,
    pub(crate) member_scopes: DashMap<ClassId, Arc<MemberScope>>,
    pub(crate) overridden: DashMap<CallableId, Arc<Vec<CallableId>>>,
    /// Phase steps taken by any symbol of this table.
    advancements: AtomicUsize,
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("generation", &self.generation)
            .field("modules", &self.modules.len())
            .field("units", &self.units.len())
            .finish_non_exhaustive()
    }
}

impl SymbolTable {
    pub fn new(
        generation: u64,
        config: Arc<AnalysisConfig>,
        modules: HashMap<ModuleId, ModuleEntry>,
        units: HashMap<FileId, (ModuleId, Arc<SourceUnit>)>,
    ) -> Result<Self, ConfigurationError> {
        let builtins_provider = modules
            .get(&ModuleId::BUILTINS)
            .map(|entry| entry.provider.clone())
            .ok_or(ConfigurationError::UnknownModule(ModuleId::BUILTINS))?;
        let builtin = |name: Symbol| -> Result<ClassId, ConfigurationError> {
            let qualified = QualifiedName::parse(BUILTINS_PACKAGE).child(name);
            builtins_provider
                .classifier(&qualified)
                .ok_or_else(|| ConfigurationError::MalformedMetadata {
                    module: crate::builtins::BUILTINS_MODULE_NAME.to_string(),
                    message: format!("missing builtin classifier {}", qualified),
                })
        };
        let builtins = BuiltinClasses {
            any: builtin(symbols::ANY())?,
            nothing: builtin(symbols::NOTHING())?,
            unit: builtin(symbols::UNIT())?,
            number: builtin(symbols::NUMBER())?,
            int: builtin(symbols::INT())?,
            long: builtin(symbols::LONG())?,
            double: builtin(symbols::DOUBLE())?,
            char: builtin(symbols::CHAR())?,
            string: builtin(symbols::STRING())?,
            boolean: builtin(symbols::BOOLEAN())?,
            array: builtin(symbols::ARRAY())?,
        };
        let default_imports = config.default_imports.iter().map(|p| QualifiedName::parse(p)).collect();
        debug!(
            "symbol table generation {}: {} modules, {} units",
            generation,
            modules.len(),
            units.len()
        );
        Ok(SymbolTable {
            generation,
            config,
            modules,
            units,
            builtins,
            default_imports,
            locks: PhaseLocks::new(),
            member_scopes: DashMap::new(),
            overridden: DashMap::new(),
            advancements: AtomicUsize::new(0),
        })
    }

    pub fn advancement_count(&self) -> usize {
        self.advancements.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn builtins(&self) -> &BuiltinClasses {
        &self.builtins
    }

    pub fn module(&self, id: ModuleId) -> Option<&ModuleEntry> {
        self.modules.get(&id)
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.modules.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn module_by_name(&self, name: &str) -> Option<ModuleId> {
        self.modules
            .iter()
            .find(|(_, entry)| entry.data.name == name)
            .map(|(id, _)| *id)
    }

    pub fn module_failure(&self, id: ModuleId) -> Option<&ConfigurationError> {
        self.modules.get(&id).and_then(|entry| entry.failure.as_ref())
    }

    pub fn visible_modules(&self, id: ModuleId) -> &[ModuleId] {
        self.modules.get(&id).map(|entry| entry.visible.as_slice()).unwrap_or(&[])
    }

    pub fn unit(&self, file: FileId) -> Option<&Arc<SourceUnit>> {
        self.units.get(&file).map(|(_, unit)| unit)
    }

    pub fn module_of_unit(&self, file: FileId) -> Option<ModuleId> {
        self.units.get(&file).map(|(module, _)| *module)
    }

    /// Units of a module in file-id order.
    pub fn units_of(&self, module: ModuleId) -> Vec<Arc<SourceUnit>> {
        let mut units: Vec<Arc<SourceUnit>> = self
            .units
            .values()
            .filter(|(m, _)| *m == module)
            .map(|(_, unit)| unit.clone())
            .collect();
        units.sort_by_key(|unit| unit.id());
        units
    }

    fn provider(&self, module: ModuleId) -> Option<&Arc<dyn SymbolProvider>> {
        self.modules.get(&module).map(|entry| &entry.provider)
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<ClassifierSymbol>> {
        self.provider(id.module)?.symbols().class(id)
    }

    pub fn callable(&self, id: CallableId) -> Option<Arc<CallableSymbol>> {
        self.provider(id.module)?.symbols().callable(id)
    }

    pub fn type_parameter(&self, id: TypeParamId) -> Option<Arc<TypeParameterSymbol>> {
        self.provider(id.module)?.symbols().type_parameter(id)
    }

    pub fn provider_of(&self, module: ModuleId) -> Option<Arc<dyn SymbolProvider>> {
        self.provider(module).cloned()
    }

    // ---- well-known types ----

    pub fn any_type(&self) -> Type {
        Type::simple(self.builtins.any, Vec::new())
    }

    pub fn nullable_any(&self) -> Type {
        self.any_type().make_nullable()
    }

    pub fn nothing_type(&self) -> Type {
        Type::simple(self.builtins.nothing, Vec::new())
    }

    pub fn unit_type(&self) -> Type {
        Type::simple(self.builtins.unit, Vec::new())
    }

    pub fn builtin_type(&self, class: ClassId) -> Type {
        Type::simple(class, Vec::new())
    }

    pub fn array_of(&self, element: Type) -> Type {
        Type::simple(self.builtins.array, vec![element])
    }

    pub fn is_any(&self, ty: &Type) -> bool {
        ty.classifier() == Some(self.builtins.any)
    }

    pub fn is_nothing(&self, ty: &Type) -> bool {
        ty.classifier() == Some(self.builtins.nothing)
    }

    pub fn render(&self, ty: &Type) -> String {
        ty.display(self).to_string()
    }

    // ---- name lookup ----

    /// A classifier by fully qualified name in the modules `module` sees.
    pub fn classifier_in_visible(&self, module: ModuleId, name: &QualifiedName) -> Option<ClassId> {
        let visible = self.visible_modules(module);
        if visible.is_empty() {
            return self.provider(module)?.classifier(name);
        }
        visible
            .iter()
            .filter_map(|m| self.provider(*m))
            .find_map(|provider| provider.classifier(name))
    }

    /// Top-level callables named `name` in `package`, across visible modules.
    pub fn top_level_callables(&self, module: ModuleId, package: &QualifiedName, name: Symbol) -> Vec<CallableId> {
        self.visible_modules(module)
            .iter()
            .filter_map(|m| self.provider(*m))
            .flat_map(|provider| provider.top_level_callables(package, name))
            .collect()
    }

    pub fn nested_class(&self, class: &ClassifierSymbol, name: Symbol) -> Option<ClassId> {
        class
            .nested
            .iter()
            .copied()
            .find(|id| self.class(*id).is_some_and(|nested| nested.name == name))
            .or_else(|| {
                if class.is_local() {
                    return None;
                }
                self.provider(class.id.module)?.classifier(&class.qualified_name.child(name))
            })
    }

    pub fn default_imports(&self) -> &[QualifiedName] {
        &self.default_imports
    }

    fn lookup_simple(&self, name: Symbol, scope: &ScopeChain) -> Option<ClassifierRef> {
        for level in scope.innermost_first() {
            match level {
                ScopeLevel::TypeParameters(parameters) => {
                    if let Some((_, id)) = parameters.iter().find(|(n, _)| *n == name) {
                        return Some(ClassifierRef::TypeParameter(*id));
                    }
                }
                ScopeLevel::Class { class, .. } => {
                    if let Some(nested) = self.class(*class).and_then(|c| self.nested_class(&c, name)) {
                        return Some(ClassifierRef::Class(nested));
                    }
                }
                ScopeLevel::LocalClass { name: local, class } if *local == name => {
                    return Some(ClassifierRef::Class(*class));
                }
                _ => {}
            }
        }
        let module = scope.module;
        if let Some(found) = scope
            .imports
            .explicit(name)
            .iter()
            .find_map(|target| self.classifier_in_visible(module, target))
        {
            return Some(ClassifierRef::Class(found));
        }
        if let Some(found) = self.classifier_in_visible(module, &scope.package.child(name)) {
            return Some(ClassifierRef::Class(found));
        }
        scope
            .imports
            .star_packages()
            .iter()
            .chain(self.default_imports.iter())
            .find_map(|package| self.classifier_in_visible(module, &package.child(name)))
            .map(ClassifierRef::Class)
    }

    /// Resolve a possibly qualified classifier name in `scope`.
    pub fn lookup_classifier(&self, name: &QualifiedName, scope: &ScopeChain) -> Option<ClassifierRef> {
        let (first, rest) = name.segments().split_first()?;
        if rest.is_empty() {
            return self.lookup_simple(*first, scope);
        }
        if let Some(ClassifierRef::Class(mut current)) = self.lookup_simple(*first, scope) {
            let mut found = true;
            for segment in rest {
                match self.class(current).and_then(|c| self.nested_class(&c, *segment)) {
                    Some(next) => current = next,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            if found {
                return Some(ClassifierRef::Class(current));
            }
        }
        self.classifier_in_visible(scope.module, name).map(ClassifierRef::Class)
    }

    // ---- scopes ----

    pub fn unit_scope(&self, file: FileId) -> Option<ScopeChain> {
        let (module, unit) = self.units.get(&file)?;
        Some(ScopeChain::for_unit(*module, unit))
    }

    fn outer_chain(&self, class: &ClassifierSymbol) -> Vec<Arc<ClassifierSymbol>> {
        let mut chain = Vec::new();
        let mut current = class.outer;
        while let Some(id) = current {
            match self.class(id) {
                Some(outer) => {
                    current = outer.outer;
                    chain.push(outer);
                }
                None => break,
            }
            if chain.len() > 64 {
                break;
            }
        }
        chain.reverse();
        chain
    }

    fn class_base_scope(&self, class: &ClassifierSymbol, outers: &[Arc<ClassifierSymbol>]) -> ScopeChain {
        let outermost = outers.first().map(|c| c.as_ref()).unwrap_or(class);
        if let Some(enclosing) = outermost.enclosing_callable.and_then(|id| self.callable(id)) {
            let mut scope = self.callable_header_scope(&enclosing);
            if let Some(provider) = self.provider(enclosing.id.module) {
                for local in provider.local_classes(enclosing.id) {
                    if let Some(symbol) = self.class(local) {
                        scope = scope.push(ScopeLevel::LocalClass {
                            name: symbol.name,
                            class: local,
                        });
                    }
                }
            }
            return scope;
        }
        match class.source_unit().and_then(|unit| self.unit_scope(unit)) {
            Some(scope) => scope,
            None => ScopeChain::for_library(class.id.module, class.package.clone()),
        }
    }

    fn own_type_parameters(&self, ids: &[TypeParamId]) -> Vec<(Symbol, TypeParamId)> {
        ids.iter()
            .filter_map(|id| self.type_parameter(*id).map(|p| (p.name, *id)))
            .collect()
    }

    /// Scope of a class header: supertypes and type-parameter bounds.
    pub fn class_header_scope(&self, class: &ClassifierSymbol) -> ScopeChain {
        let outers = self.outer_chain(class);
        let mut scope = self.class_base_scope(class, &outers);
        for (i, outer) in outers.iter().enumerate() {
            let through_inner = class.is_inner() && outers[i + 1..].iter().all(|c| c.is_inner());
            if through_inner && !outer.type_parameters.is_empty() {
                scope = scope.push(ScopeLevel::TypeParameters(self.own_type_parameters(&outer.type_parameters)));
            }
            scope = scope.push(ScopeLevel::Class {
                class: outer.id,
                receiver: through_inner.then(|| self.default_type(outer)),
            });
        }
        if !class.type_parameters.is_empty() {
            scope = scope.push(ScopeLevel::TypeParameters(self.own_type_parameters(&class.type_parameters)));
        }
        scope
    }

    /// Scope of a class body, with the class as implicit receiver.
    pub fn class_body_scope(&self, class: &ClassifierSymbol) -> ScopeChain {
        self.class_header_scope(class).push(ScopeLevel::Class {
            class: class.id,
            receiver: Some(self.default_type(class)),
        })
    }

    /// Scope in which a callable's signature is resolved.
    pub fn callable_header_scope(&self, callable: &CallableSymbol) -> ScopeChain {
        let base = match callable.containing_class.and_then(|id| self.class(id)) {
            Some(class) => {
                let without_receiver = callable.kind == CallableKind::Constructor
                    || matches!(callable.source(), Some(SourceCallable::ParameterProperty { .. }));
                if without_receiver {
                    self.class_header_scope(&class).push(ScopeLevel::Class {
                        class: class.id,
                        receiver: None,
                    })
                } else {
                    self.class_body_scope(&class)
                }
            }
            None => match callable.source_unit().and_then(|unit| self.unit_scope(unit)) {
                Some(scope) => scope,
                None => ScopeChain::for_library(callable.id.module, callable.package.clone()),
            },
        };
        if callable.type_parameters.is_empty() {
            base
        } else {
            base.push(ScopeLevel::TypeParameters(self.own_type_parameters(&callable.type_parameters)))
        }
    }

    /// Header scope plus the extension receiver and the value parameters.
    pub fn callable_body_scope(&self, callable: &CallableSymbol) -> ScopeChain {
        let mut scope = self.callable_header_scope(callable);
        let header = self.callable_header(callable);
        if let Some(receiver) = &header.receiver {
            scope = scope.push(ScopeLevel::Receiver(receiver.clone()));
        }
        for (parameter, ty) in callable.parameters.iter().zip(&header.parameters) {
            let ty = if parameter.is_vararg {
                self.array_of(ty.clone())
            } else {
                ty.clone()
            };
            scope = scope.with_local(parameter.name, ty, parameter.span);
        }
        scope
    }

    // ---- type references ----

    pub fn resolve_type_ref(&self, type_ref: &TypeRef, scope: &ScopeChain, reporter: &mut DiagnosticReporter) -> Type {
        let resolved = match &type_ref.kind {
            TypeRefKind::Named { name, arguments } => self.resolve_named(type_ref, name, arguments, scope, reporter),
            TypeRefKind::Function {
                context_receivers,
                receiver,
                parameters,
                return_type,
                is_suspend,
            } => Type::Function {
                parameters: parameters
                    .iter()
                    .map(|p| self.resolve_type_ref(p, scope, reporter))
                    .collect(),
                receiver: receiver
                    .as_ref()
                    .map(|r| Box::new(self.resolve_type_ref(r, scope, reporter))),
                return_type: Box::new(self.resolve_type_ref(return_type, scope, reporter)),
                context_receivers: context_receivers
                    .iter()
                    .map(|c| self.resolve_type_ref(c, scope, reporter))
                    .collect(),
                is_suspend: *is_suspend,
                nullable: false,
            },
            TypeRefKind::Intersection(members) => {
                Type::intersection(members.iter().map(|m| self.resolve_type_ref(m, scope, reporter)))
            }
        };
        if type_ref.nullable {
            resolved.make_nullable()
        } else {
            resolved
        }
    }

    fn resolve_named(
        &self,
        type_ref: &TypeRef,
        name: &QualifiedName,
        arguments: &[TypeArgumentRef],
        scope: &ScopeChain,
        reporter: &mut DiagnosticReporter,
    ) -> Type {
        let ranges = ElementRanges::new(type_ref.span).with_reference(type_ref.span);
        let name_arg = match name.segments() {
            [single] => DiagnosticArg::Name(*single),
            _ => DiagnosticArg::Text(name.to_string()),
        };
        match self.lookup_classifier(name, scope) {
            None => {
                reporter.report_default(DiagnosticKind::UnresolvedReference, &ranges, vec![name_arg]);
                Type::Error(ErrorKind::Unresolved)
            }
            Some(ClassifierRef::TypeParameter(id)) => {
                if !arguments.is_empty() {
                    reporter.report_default(
                        DiagnosticKind::WrongNumberOfTypeArguments,
                        &ranges,
                        vec![DiagnosticArg::Count(0), name_arg],
                    );
                    return Type::Error(ErrorKind::Unresolved);
                }
                Type::parameter(id)
            }
            Some(ClassifierRef::Class(id)) => {
                let Some(class) = self.class(id) else {
                    return Type::Error(ErrorKind::Internal);
                };
                let expected = self.class_type_parameters(&class);
                let mut projections: Vec<TypeProjection> = arguments
                    .iter()
                    .map(|argument| match argument {
                        TypeArgumentRef::Invariant(t) => {
                            TypeProjection::Invariant(self.resolve_type_ref(t, scope, reporter))
                        }
                        TypeArgumentRef::In(t) => TypeProjection::In(self.resolve_type_ref(t, scope, reporter)),
                        TypeArgumentRef::Out(t) => TypeProjection::Out(self.resolve_type_ref(t, scope, reporter)),
                        TypeArgumentRef::Star => TypeProjection::Star,
                    })
                    .collect();
                if projections.len() != expected.len() {
                    if class.is_inner() && projections.len() == class.type_parameters.len() {
                        projections.extend(self.outer_arguments(&class, scope));
                    } else {
                        reporter.report_default(
                            DiagnosticKind::WrongNumberOfTypeArguments,
                            &ranges,
                            vec![DiagnosticArg::Count(class.type_parameters.len()), DiagnosticArg::Name(class.name)],
                        );
                        return Type::Error(ErrorKind::Unresolved);
                    }
                }
                Type::nominal(id, projections)
            }
        }
    }

    /// Arguments of the outer classes of an inner class, taken from the
    /// implicit receivers in scope; star projections where none is available.
    fn outer_arguments(&self, class: &ClassifierSymbol, scope: &ScopeChain) -> Vec<TypeProjection> {
        let Some(outer) = class.outer.and_then(|id| self.class(id)) else {
            return Vec::new();
        };
        let receivers = scope.implicit_receivers();
        match receivers.iter().find(|(ty, _)| ty.classifier() == Some(outer.id)) {
            Some((ty, _)) => ty.arguments().to_vec(),
            None => self
                .class_type_parameters(&outer)
                .iter()
                .map(|_| TypeProjection::Star)
                .collect(),
        }
    }

    /// Own type parameters followed by those of the enclosing classes an inner class captures.
    pub fn class_type_parameters(&self, class: &ClassifierSymbol) -> Vec<TypeParamId> {
        let mut parameters = class.type_parameters.clone();
        if class.is_inner() {
            if let Some(outer) = class.outer.and_then(|id| self.class(id)) {
                parameters.extend(self.class_type_parameters(&outer));
            }
        }
        parameters
    }

    /// The class applied to its own type parameters.
    pub fn default_type(&self, class: &ClassifierSymbol) -> Type {
        Type::simple(
            class.id,
            self.class_type_parameters(class).into_iter().map(Type::parameter).collect(),
        )
    }

    // ---- lock-free memos ----

    fn bounds_of<'p>(&self, parameter: &'p TypeParameterSymbol) -> &'p ResolvedBounds {
        parameter.bounds.get_or_init(|| {
            let scope = match parameter.owner {
                TypeParamOwner::Class(id) => self.class(id).map(|c| self.class_header_scope(&c)),
                TypeParamOwner::Callable(id) => self.callable(id).map(|c| self.callable_header_scope(&c)),
            };
            let Some(scope) = scope else {
                return ResolvedBounds::default();
            };
            let mut reporter = DiagnosticReporter::new();
            let types = parameter
                .bound_refs
                .iter()
                .map(|bound| self.resolve_type_ref(bound, &scope, &mut reporter))
                .collect();
            ResolvedBounds {
                types,
                diagnostics: reporter.into_diagnostics(),
            }
        })
    }

    /// Declared upper bounds; empty means `Any?`.
    pub fn type_parameter_bounds(&self, id: TypeParamId) -> Vec<Type> {
        self.type_parameter(id)
            .map(|p| self.bounds_of(&p).types.clone())
            .unwrap_or_default()
    }

    pub fn type_parameter_bound_diagnostics(&self, id: TypeParamId) -> Vec<crate::diagnostics::Diagnostic> {
        self.type_parameter(id)
            .map(|p| self.bounds_of(&p).diagnostics.clone())
            .unwrap_or_default()
    }

    /// The bounds as one type: their intersection, or `Any?` without bounds.
    pub fn upper_bound(&self, id: TypeParamId) -> Type {
        let bounds = self.type_parameter_bounds(id);
        if bounds.is_empty() {
            self.nullable_any()
        } else {
            Type::intersection(bounds)
        }
    }

    pub fn callable_header<'c>(&self, callable: &'c CallableSymbol) -> &'c CallableHeader {
        callable.header.get_or_init(|| {
            let scope = self.callable_header_scope(callable);
            let mut reporter = DiagnosticReporter::new();
            let receiver = callable
                .receiver_ref
                .as_ref()
                .map(|r| self.resolve_type_ref(r, &scope, &mut reporter));
            let parameters = callable
                .parameters
                .iter()
                .map(|p| self.resolve_type_ref(&p.type_ref, &scope, &mut reporter))
                .collect();
            CallableHeader {
                receiver,
                parameters,
                diagnostics: reporter.into_diagnostics(),
            }
        })
    }

    // ---- phases ----

    /// Advance a class to at least `target`.
    pub fn ensure_class_phase(&self, class: &ClassifierSymbol, target: Phase) -> Result<(), AdvanceError> {
        if class.phase() >= target {
            return Ok(());
        }
        let _guard = self.locks.acquire(SymbolKey::Class(class.id))?;
        while class.phase() < target {
            let Some(next) = class.phase().next() else {
                break;
            };
            match next {
                Phase::SupertypesResolved => {
                    let resolved = self.compute_supertypes(class);
                    let _ = class.supertypes.set(resolved);
                }
                Phase::StatusResolved => {
                    let status = self.compute_class_status(class);
                    let _ = class.status.set(status);
                }
                Phase::TypesResolved | Phase::Raw => {}
                Phase::BodyResolved => {
                    let checks = crate::checker::class_checks(self, class);
                    let _ = class.checks.set(checks);
                }
            }
            class.phase.advance_to(next);
            self.advancements.fetch_add(1, Ordering::Relaxed);
            trace!("{} advanced to {:?}", class.id, next);
        }
        Ok(())
    }

    /// Advance a callable to at least `target`.
    pub fn ensure_callable_phase(&self, callable: &CallableSymbol, target: Phase) -> Result<(), AdvanceError> {
        if callable.phase() >= target {
            return Ok(());
        }
        let _guard = self.locks.acquire(SymbolKey::Callable(callable.id))?;
        while callable.phase() < target {
            let Some(next) = callable.phase().next() else {
                break;
            };
            match next {
                Phase::SupertypesResolved | Phase::Raw => {}
                Phase::StatusResolved => {
                    let status = self.compute_callable_status(callable);
                    let _ = callable.status.set(status);
                }
                Phase::TypesResolved => {
                    self.callable_header(callable);
                    let signature = self.compute_signature(callable);
                    let _ = callable.signature.set(signature);
                }
                Phase::BodyResolved => {
                    if callable.source().is_some() {
                        let expected = callable
                            .return_ref
                            .as_ref()
                            .and_then(|_| callable.signature.get())
                            .map(|s| s.return_type.clone());
                        self.publish_body(callable, expected.as_ref());
                    }
                }
            }
            callable.phase.advance_to(next);
            self.advancements.fetch_add(1, Ordering::Relaxed);
            trace!("{} advanced to {:?}", callable.id, next);
        }
        Ok(())
    }

    fn compute_supertypes(&self, class: &ClassifierSymbol) -> ResolvedSupertypes {
        let Some(provider) = self.provider(class.id.module) else {
            return ResolvedSupertypes::default();
        };
        let scope = self.class_header_scope(class);
        let mut reporter = DiagnosticReporter::new();
        let types = provider
            .supertype_refs(class)
            .iter()
            .map(|r| self.resolve_type_ref(r, &scope, &mut reporter))
            .filter(|t| !t.is_error())
            .collect();
        let diagnostics = match class.origin {
            ClassOrigin::Source { .. } => reporter.into_diagnostics(),
            ClassOrigin::Library => Vec::new(),
        };
        ResolvedSupertypes { types, diagnostics }
    }

    fn compute_class_status(&self, class: &ClassifierSymbol) -> ClassStatus {
        let mut visibility = class.declared_visibility;
        if let Some(outer) = class.outer.and_then(|id| self.class(id)) {
            visibility = visibility.min(self.class_status(&outer).visibility);
        }
        ClassStatus {
            visibility,
            modality: class.declared_modality,
        }
    }

    fn compute_callable_status(&self, callable: &CallableSymbol) -> CallableStatus {
        let class = callable.containing_class.and_then(|id| self.class(id));
        let class_status = class.as_ref().map(|c| self.class_status(c));
        let visibility = match &class_status {
            Some(status) => callable.declared_visibility.min(status.visibility),
            None => callable.declared_visibility,
        };
        let modality = if callable.kind == CallableKind::Constructor {
            Modality::Final
        } else {
            match (callable.declared_modality, &class) {
                (Some(modality), _) => modality,
                (None, Some(c)) if c.is_interface() => {
                    if callable.flags.contains(CallableFlags::HAS_BODY) {
                        Modality::Open
                    } else {
                        Modality::Abstract
                    }
                }
                (None, Some(_)) if callable.flags.contains(CallableFlags::OVERRIDE) => Modality::Open,
                _ => Modality::Final,
            }
        };
        let class_is_final = matches!(
            (&class, &class_status),
            (Some(c), Some(status)) if !c.is_interface() && status.modality == Modality::Final
        );
        let modality = if class_is_final && modality == Modality::Open {
            Modality::Final
        } else {
            modality
        };
        CallableStatus { visibility, modality }
    }

    fn compute_signature(&self, callable: &CallableSymbol) -> ResolvedSignature {
        let mut reporter = DiagnosticReporter::new();
        let scope = self.callable_header_scope(callable);
        if let Some(receiver) = (callable.receiver_ref.as_ref()).zip(self.callable_header(callable).receiver.as_ref()) {
            self.check_type_bounds(receiver.0, receiver.1, &mut reporter);
        }
        for (parameter, ty) in callable.parameters.iter().zip(&self.callable_header(callable).parameters) {
            self.check_type_bounds(&parameter.type_ref, ty, &mut reporter);
        }
        let return_type = if callable.kind == CallableKind::Constructor {
            callable
                .containing_class
                .and_then(|id| self.class(id))
                .map(|class| self.default_type(&class))
                .unwrap_or(Type::Error(ErrorKind::Internal))
        } else if let Some(return_ref) = &callable.return_ref {
            let ty = self.resolve_type_ref(return_ref, &scope, &mut reporter);
            self.check_type_bounds(return_ref, &ty, &mut reporter);
            ty
        } else {
            match callable.source() {
                Some(SourceCallable::Function(f)) if f.body.is_some() && !f.has_block_body() => {
                    let body = self.publish_body(callable, None);
                    self.approximate_if_exposed(callable, body.result_type.clone())
                }
                Some(SourceCallable::Property(p)) if p.initializer.is_some() => {
                    let body = self.publish_body(callable, None);
                    self.approximate_if_exposed(callable, body.result_type.clone())
                }
                Some(SourceCallable::Property(_)) => Type::Error(ErrorKind::Unresolved),
                _ => self.unit_type(),
            }
        };
        let diagnostics = match callable.origin {
            CallableOrigin::Source { .. } => reporter.into_diagnostics(),
            CallableOrigin::Library => Vec::new(),
        };
        ResolvedSignature {
            return_type,
            diagnostics,
        }
    }

    /// Inferred types of declarations visible outside their body do not mention local classes.
    fn approximate_if_exposed(&self, callable: &CallableSymbol, ty: Type) -> Type {
        let inside_local = callable
            .containing_class
            .and_then(|id| self.class(id))
            .is_some_and(|c| c.is_local());
        if inside_local || callable.declared_visibility == Visibility::Private {
            ty
        } else {
            self.approximate_local_types(&ty)
        }
    }

    fn publish_body(&self, callable: &CallableSymbol, expected: Option<&Type>) -> Arc<BodyResolution> {
        if let Some(body) = callable.body.get() {
            return body.clone();
        }
        let resolved = Arc::new(resolve_callable_body(self, callable, expected));
        let _ = callable.body.set(resolved.clone());
        callable.body.get().cloned().unwrap_or(resolved)
    }

    // ---- phase-backed accessors ----

    /// Resolved direct supertypes as declared, without the implicit `Any`.
    pub fn class_supertypes(&self, class: &ClassifierSymbol) -> Vec<Type> {
        if let Err(error) = self.ensure_class_phase(class, Phase::SupertypesResolved) {
            trace!("supertypes of {} unavailable: {}", class.id, error);
        }
        class
            .supertypes
            .get()
            .map(|resolved| resolved.types.clone())
            .unwrap_or_default()
    }

    pub fn class_status(&self, class: &ClassifierSymbol) -> ClassStatus {
        if let Err(error) = self.ensure_class_phase(class, Phase::StatusResolved) {
            trace!("status of {} unavailable: {}", class.id, error);
        }
        class.status.get().cloned().unwrap_or(ClassStatus {
            visibility: class.declared_visibility,
            modality: class.declared_modality,
        })
    }

    pub fn callable_status(&self, callable: &CallableSymbol) -> CallableStatus {
        if let Err(error) = self.ensure_callable_phase(callable, Phase::StatusResolved) {
            trace!("status of {} unavailable: {}", callable.id, error);
        }
        callable.status.get().cloned().unwrap_or(CallableStatus {
            visibility: callable.declared_visibility,
            modality: callable.declared_modality.unwrap_or_default(),
        })
    }

    /// Return type; fails when the request re-enters the callable's own resolution.
    pub fn callable_return_type(&self, callable: &CallableSymbol) -> Result<Type, AdvanceError> {
        self.ensure_callable_phase(callable, Phase::TypesResolved)?;
        Ok(callable
            .signature
            .get()
            .map(|s| s.return_type.clone())
            .unwrap_or(Type::Error(ErrorKind::Internal)))
    }

    pub fn callable_body(&self, callable: &CallableSymbol) -> Result<Option<Arc<BodyResolution>>, AdvanceError> {
        self.ensure_callable_phase(callable, Phase::BodyResolved)?;
        Ok(callable.body.get().cloned())
    }

    /// Parameters, substituted return type and receiver as a function type.
    pub fn callable_type(&self, callable: &CallableSymbol) -> Result<Type, AdvanceError> {
        let header = self.callable_header(callable);
        let return_type = self.callable_return_type(callable)?;
        Ok(Type::Function {
            parameters: header.parameters.clone(),
            receiver: header.receiver.clone().map(Box::new),
            return_type: Box::new(return_type),
            context_receivers: Vec::new(),
            is_suspend: callable.flags.contains(CallableFlags::SUSPEND),
            nullable: false,
        })
    }

    pub fn is_object(&self, class: ClassId) -> bool {
        self.class(class).is_some_and(|c| crate::providers::is_object_like(c.kind))
    }

    fn display_name(&self, class: &ClassifierSymbol) -> String {
        let outers = self.outer_chain(class);
        let mut name = String::new();
        for outer in outers {
            name.push_str(outer.name.as_str());
            name.push('.');
        }
        name.push_str(class.name.as_str());
        name
    }
}

impl NameRenderer for SymbolTable {
    fn class_name(&self, class: ClassId) -> String {
        self.class(class)
            .map(|c| self.display_name(&c))
            .unwrap_or_else(|| class.to_string())
    }

    fn type_parameter_name(&self, parameter: TypeParamId) -> String {
        self.type_parameter(parameter)
            .map(|p| p.name.to_string())
            .unwrap_or_else(|| parameter.to_string())
    }
}

impl SymbolRenderer for SymbolTable {
    fn callable_name(&self, callable: CallableId) -> String {
        let Some(symbol) = self.callable(callable) else {
            return callable.to_string();
        };
        let mut name = String::new();
        if symbol.kind != CallableKind::Constructor {
            if let Some(class) = symbol.containing_class {
                name.push_str(&self.class_name(class));
                name.push('.');
            }
        }
        name.push_str(symbol.name.as_str());
        if symbol.kind != CallableKind::Property {
            let parameters: Vec<String> = symbol.parameters.iter().map(|p| p.type_ref.to_string()).collect();
            name.push('(');
            name.push_str(&parameters.join(", "));
            name.push(')');
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{class_named, project_with, top_level};
    use kestrel_syntax::builder::{expr, SourceBuilder};
    use std::sync::Barrier;

    #[test]
    fn test_builtins_are_found() {
        let (project, _) = project_with(vec![SourceBuilder::new("a.kt")]);
        let table = project.table().unwrap();
        let any = table.class(table.builtins().any).unwrap();
        assert_eq!(any.qualified_name.to_string(), "kestrel.Any");
        assert_eq!(table.render(&table.nullable_any()), "Any?");
    }

    #[test]
    fn test_lookup_order_prefers_type_parameters_then_imports() {
        let (project, module) = project_with(vec![
            SourceBuilder::new("lib.kt").package("lib").class("T", |c| c).class("Shape", |c| c),
            SourceBuilder::new("app.kt")
                .package("app")
                .import("lib.Shape")
                .class("Shape", |c| c)
                .class("Box", |c| c.type_parameter("T")),
        ]);
        let table = project.table().unwrap();
        let boxed = class_named(&table, module, "app.Box");
        let scope = table.class_header_scope(&boxed);

        let t = table.lookup_classifier(&QualifiedName::parse("T"), &scope);
        assert!(matches!(t, Some(ClassifierRef::TypeParameter(_))));

        // explicit imports win over the unit's own package
        let shape = table.lookup_classifier(&QualifiedName::parse("Shape"), &scope);
        let lib_shape = class_named(&table, module, "lib.Shape");
        assert_eq!(shape, Some(ClassifierRef::Class(lib_shape.id)));

        let int = table.lookup_classifier(&QualifiedName::parse("Int"), &scope);
        assert_eq!(int, Some(ClassifierRef::Class(table.builtins().int)));
        let qualified = table.lookup_classifier(&QualifiedName::parse("lib.T"), &scope);
        assert!(matches!(qualified, Some(ClassifierRef::Class(_))));
    }

    #[test]
    fn test_resolve_type_ref_reports_unresolved_and_arity() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").class("Box", |c| {
            c.type_parameter("T")
        })]);
        let table = project.table().unwrap();
        let unit = table.units_of(module)[0].clone();
        let scope = table.unit_scope(unit.id()).unwrap();
        let mut reporter = DiagnosticReporter::new();

        let ok = table.resolve_type_ref(&TypeRef::parse("Box<Int>?").unwrap(), &scope, &mut reporter);
        assert_eq!(table.render(&ok), "Box<Int>?");
        assert!(reporter.is_empty());

        let missing = table.resolve_type_ref(&TypeRef::parse("List<Missing>").unwrap(), &scope, &mut reporter);
        assert!(missing.contains_error());
        let arity = table.resolve_type_ref(&TypeRef::parse("Box").unwrap(), &scope, &mut reporter);
        assert!(arity.is_error());
        let kinds: Vec<DiagnosticKind> = reporter.diagnostics().iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![DiagnosticKind::UnresolvedReference, DiagnosticKind::WrongNumberOfTypeArguments]
        );
    }

    #[test]
    fn test_inner_class_captures_outer_parameters() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").class("Outer", |c| {
            c.type_parameter("X")
                .class("Inner", |i| i.inner().type_parameter("Y"))
                .function("make", |f| f.returns("Inner<Int>"))
        })]);
        let table = project.table().unwrap();
        let inner = class_named(&table, module, "app.Outer.Inner");
        let outer = class_named(&table, module, "app.Outer");
        let parameters = table.class_type_parameters(&inner);
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters[0], inner.type_parameters[0]);
        assert_eq!(parameters[1], outer.type_parameters[0]);

        let make = table.callable(outer.members[0]).unwrap();
        let return_type = table.callable_return_type(&make).unwrap();
        assert_eq!(table.render(&return_type), "Outer.Inner<Int, X>");
    }

    #[test]
    fn test_phases_only_increase() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Base", |c| c.open())
            .class("Derived", |c| c.supertype("Base"))
            .function("answer", |f| f.body(expr::int(42)))]);
        let table = project.table().unwrap();
        let derived = class_named(&table, module, "app.Derived");
        assert_eq!(derived.phase(), Phase::Raw);
        table.ensure_class_phase(&derived, Phase::StatusResolved).unwrap();
        assert_eq!(derived.phase(), Phase::StatusResolved);
        table.ensure_class_phase(&derived, Phase::SupertypesResolved).unwrap();
        assert_eq!(derived.phase(), Phase::StatusResolved);
        assert_eq!(table.class_supertypes(&derived).len(), 1);

        let answer = table
            .top_level_callables(module, &QualifiedName::parse("app"), Symbol::intern("answer"))
            .first()
            .and_then(|id| table.callable(*id))
            .unwrap();
        let ty = table.callable_return_type(&answer).unwrap();
        assert_eq!(table.render(&ty), "Int");
        // inferring the type resolved the body as well
        assert!(answer.resolved_body().is_some());
        assert_eq!(answer.phase(), Phase::TypesResolved);
    }

    #[test]
    fn test_member_status_inherits_class_constraints() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .interface("Shape", |c| c.function("area", |f| f.returns("Double")).function("name", |f| {
                f.returns("String").body(expr::string("shape"))
            }))
            .class("Square", |c| c.private().function("side", |f| f.open().returns("Int").body(expr::int(1))))]);
        let table = project.table().unwrap();
        let shape = class_named(&table, module, "app.Shape");
        let area = table.callable(shape.members[0]).unwrap();
        let name = table.callable(shape.members[1]).unwrap();
        assert_eq!(table.callable_status(&area).modality, Modality::Abstract);
        assert_eq!(table.callable_status(&name).modality, Modality::Open);

        let square = class_named(&table, module, "app.Square");
        let side = table.callable(square.members[0]).unwrap();
        let status = table.callable_status(&side);
        assert_eq!(status.visibility, Visibility::Private);
        assert_eq!(status.modality, Modality::Final);
    }

    fn racing_project() -> (crate::project::Project, ModuleId) {
        project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Base", |c| c.open())
            .class("Derived", |c| c.supertype("Base").function("size", |f| f.returns("Int").body(expr::int(1))))
            .function("helper", |f| f.param("x", "Int").body(expr::name("x")))
            .function("work", |f| f.body(expr::call("helper", vec![expr::int(2)])))])
    }

    /// Advances `Derived` and `work` to their body phase and returns the steps taken.
    fn advance_all(table: &SymbolTable, module: ModuleId) -> usize {
        let derived = class_named(table, module, "app.Derived");
        let work = top_level(table, module, "app", "work");
        let before = table.advancement_count();
        table.ensure_class_phase(&derived, Phase::BodyResolved).unwrap();
        table.ensure_callable_phase(&work, Phase::BodyResolved).unwrap();
        table.advancement_count() - before
    }

    #[test]
    fn test_concurrent_advancement_computes_once() {
        let (sequential, module) = racing_project();
        let expected = advance_all(&sequential.table().unwrap(), module);
        assert!(expected > 0);

        const THREADS: usize = 8;
        let (project, module) = racing_project();
        let table = project.table().unwrap();
        let derived = class_named(&table, module, "app.Derived");
        let work = top_level(&table, module, "app", "work");
        let before = table.advancement_count();
        let barrier = Barrier::new(THREADS);
        let bodies: Vec<Arc<BodyResolution>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|index| {
                    let (table, derived, work, barrier) = (&table, &derived, &work, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        if index % 2 == 0 {
                            table.ensure_class_phase(derived, Phase::BodyResolved).unwrap();
                            table.ensure_callable_phase(work, Phase::BodyResolved).unwrap();
                        } else {
                            table.ensure_callable_phase(work, Phase::BodyResolved).unwrap();
                            table.ensure_class_phase(derived, Phase::BodyResolved).unwrap();
                        }
                        assert!(derived.phase() >= Phase::BodyResolved);
                        assert!(work.phase() >= Phase::BodyResolved);
                        table.callable_body(work).unwrap().unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(table.advancement_count() - before, expected);
        assert!(bodies.iter().all(|body| Arc::ptr_eq(body, &bodies[0])));
        assert!(derived.checks.get().is_some());
    }
}
