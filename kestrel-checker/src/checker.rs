//! Declaration checks and whole-unit analysis.
//!
//! Every declaration keeps its diagnostics in its own memo (supertypes,
//! bounds, header, signature, body, class checks). The unit checker only
//! collects them in declaration order, so the result does not depend on
//! which thread happened to advance a symbol first.

use crate::diagnostics::{Diagnostic, DiagnosticArg, DiagnosticKind, DiagnosticReporter, ElementRanges, Severity};
use crate::error::{ConfigurationError, ResolutionResult};
use crate::lifetime::Checkpoint;
use crate::providers::{DeclarationRef, SymbolProvider};
use crate::symbol_table::SymbolTable;
use crate::symbols::{CallableSymbol, ClassId, ClassifierSymbol, ModuleId, Phase, SourceCallable};
use crate::types::Type;
use kestrel_syntax::{ClassDecl, Declaration, FileId, Modality, Span, Symbol};
use tracing::{debug, trace};

/// Checks of a class declaration itself, published at `BodyResolved`.
pub fn class_checks(table: &SymbolTable, class: &ClassifierSymbol) -> Vec<Diagnostic> {
    let Some(declaration) = class.declaration() else {
        return Vec::new();
    };
    let scope = table.class_header_scope(class);
    // Unresolved references were already reported with the supertypes.
    let mut resolution = DiagnosticReporter::new();
    let mut reporter = DiagnosticReporter::new();

    for type_ref in &declaration.supertypes {
        let ty = table.resolve_type_ref(type_ref, &scope, &mut resolution);
        let at = ElementRanges::new(type_ref.span);
        match &ty {
            Type::Error(_) | Type::Flexible { .. } => {}
            Type::Nominal { classifier, .. } => {
                let Some(supertype) = table.class(*classifier) else {
                    continue;
                };
                if !supertype.is_interface() && table.class_status(&supertype).modality == Modality::Final {
                    reporter.report_default(DiagnosticKind::FinalSupertype, &at, vec![DiagnosticArg::Class(supertype.id)]);
                }
                table.check_type_bounds(type_ref, &ty, &mut reporter);
            }
            Type::TypeParameter { .. } | Type::Function { .. } | Type::Intersection(_) => {
                reporter.report_default(
                    DiagnosticKind::SupertypeNotAClassOrInterface,
                    &at,
                    vec![DiagnosticArg::Type(ty.clone())],
                );
            }
        }
    }

    if table.is_on_supertype_cycle(class) {
        reporter.report_default(
            DiagnosticKind::CyclicInheritance,
            &class_ranges(declaration),
            vec![DiagnosticArg::Class(class.id)],
        );
    }
    reporter.into_diagnostics()
}

fn class_ranges(declaration: &ClassDecl) -> ElementRanges {
    let ranges = ElementRanges::new(declaration.span).with_name(declaration.name_span);
    match declaration.supertypes.iter().map(|r| r.span).reduce(|a, b| a.cover(&b)) {
        Some(list) => ranges.with_supertypes(list),
        None => ranges,
    }
}

/// Supertype, bound and declaration-check diagnostics of one class.
pub fn class_declaration_diagnostics(table: &SymbolTable, class: &ClassifierSymbol) -> Vec<Diagnostic> {
    if let Err(error) = table.ensure_class_phase(class, Phase::BodyResolved) {
        trace!("checks of {} unavailable: {}", class.id, error);
    }
    let mut diagnostics = class
        .resolved_supertypes()
        .map(|s| s.diagnostics.clone())
        .unwrap_or_default();
    for parameter in &class.type_parameters {
        diagnostics.extend(table.type_parameter_bound_diagnostics(*parameter));
    }
    diagnostics.extend(class.check_diagnostics().iter().cloned());
    diagnostics
}

/// Header, signature and body diagnostics of one function, property or constructor.
pub fn callable_declaration_diagnostics(table: &SymbolTable, callable: &CallableSymbol) -> Vec<Diagnostic> {
    if let Err(error) = table.ensure_callable_phase(callable, Phase::BodyResolved) {
        trace!("body of {} unavailable: {}", callable.id, error);
    }
    let mut diagnostics = Vec::new();
    // A constructor parameter property shares its type reference with the constructor.
    let parameter_property = matches!(callable.source(), Some(SourceCallable::ParameterProperty { .. }));
    if !parameter_property {
        diagnostics.extend(table.callable_header(callable).diagnostics.iter().cloned());
        for parameter in &callable.type_parameters {
            diagnostics.extend(table.type_parameter_bound_diagnostics(*parameter));
        }
        if let Some(signature) = callable.resolved_signature() {
            diagnostics.extend(signature.diagnostics.iter().cloned());
        }
    }
    if let Some(body) = callable.resolved_body() {
        diagnostics.extend(body.diagnostics.iter().cloned());
    }
    diagnostics
}

/// Diagnostics of a class, its constructors and members, and nested classes.
pub(crate) fn class_tree_diagnostics(table: &SymbolTable, class: ClassId) -> Vec<Diagnostic> {
    let Some(symbol) = table.class(class) else {
        return Vec::new();
    };
    let mut diagnostics = class_declaration_diagnostics(table, &symbol);
    for id in symbol.constructors.iter().chain(&symbol.members) {
        if let Some(callable) = table.callable(*id) {
            diagnostics.extend(callable_declaration_diagnostics(table, &callable));
        }
    }
    for nested in &symbol.nested {
        diagnostics.extend(class_tree_diagnostics(table, *nested));
    }
    diagnostics
}

#[derive(Debug, Clone)]
pub struct DeclarationResult {
    pub name: Symbol,
    pub target: DeclarationRef,
    pub diagnostics: Vec<Diagnostic>,
}

impl DeclarationResult {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Diagnostics of one source unit, grouped by declaration in traversal order.
#[derive(Debug, Clone)]
pub struct UnitAnalysis {
    pub unit: FileId,
    pub module: ModuleId,
    pub path: String,
    pub declarations: Vec<DeclarationResult>,
}

impl UnitAnalysis {
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.declarations.iter().flat_map(|d| d.diagnostics.iter())
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics().filter(|d| d.is_error()).count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

pub struct UnitChecker<'a> {
    table: &'a SymbolTable,
    checkpoint: &'a dyn Checkpoint,
}

impl<'a> UnitChecker<'a> {
    pub fn new(table: &'a SymbolTable, checkpoint: &'a dyn Checkpoint) -> Self {
        UnitChecker { table, checkpoint }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn check_unit(&self, unit: FileId) -> ResolutionResult<UnitAnalysis> {
        let module = self
            .table
            .module_of_unit(unit)
            .ok_or(ConfigurationError::UnknownUnit(unit))?;
        if let Some(failure) = self.table.module_failure(module) {
            return Err(failure.clone().into());
        }
        let source = self
            .table
            .unit(unit)
            .cloned()
            .ok_or(ConfigurationError::UnknownUnit(unit))?;
        let provider = self
            .table
            .provider_of(module)
            .ok_or(ConfigurationError::UnknownModule(module))?;

        let mut declarations = Vec::new();
        for declaration in source.declarations() {
            self.visit(provider.as_ref(), declaration, &mut declarations)?;
        }
        if self.table.config().warnings_as_errors {
            for result in &mut declarations {
                for diagnostic in &mut result.diagnostics {
                    if diagnostic.severity == Severity::Warning {
                        diagnostic.severity = Severity::Error;
                    }
                }
            }
        }
        let analysis = UnitAnalysis {
            unit,
            module,
            path: source.path().to_string(),
            declarations,
        };
        debug!("{}: {} diagnostics", analysis.path, analysis.diagnostics().count());
        Ok(analysis)
    }

    fn visit(
        &self,
        provider: &dyn SymbolProvider,
        declaration: &Declaration,
        out: &mut Vec<DeclarationResult>,
    ) -> ResolutionResult<()> {
        self.checkpoint.checkpoint()?;
        let Some(target) = provider.declaration_at(declaration.span()) else {
            return Err(ConfigurationError::UnknownUnit(declaration.span().file).into());
        };
        match target {
            DeclarationRef::Class(id) => {
                let Some(class) = self.table.class(id) else {
                    return Ok(());
                };
                out.push(DeclarationResult {
                    name: class.name,
                    target,
                    diagnostics: class_declaration_diagnostics(self.table, &class),
                });
                for constructor in class.constructors.iter().filter_map(|id| self.table.callable(*id)) {
                    if is_indexed(provider, &constructor) {
                        continue;
                    }
                    out.push(self.callable_result(&constructor));
                }
                if let Declaration::Class(decl) = declaration {
                    for constructor in &decl.constructors {
                        self.visit_span(provider, constructor.span, out)?;
                    }
                    for member in &decl.members {
                        self.visit(provider, member, out)?;
                    }
                }
                for property in class
                    .members
                    .iter()
                    .filter_map(|id| self.table.callable(*id))
                    .filter(|c| matches!(c.source(), Some(SourceCallable::ParameterProperty { .. })))
                {
                    let result = self.callable_result(&property);
                    if !result.diagnostics.is_empty() {
                        out.push(result);
                    }
                }
            }
            DeclarationRef::Callable(id) => {
                if let Some(callable) = self.table.callable(id) {
                    out.push(self.callable_result(&callable));
                }
            }
        }
        Ok(())
    }

    fn visit_span(&self, provider: &dyn SymbolProvider, span: Span, out: &mut Vec<DeclarationResult>) -> ResolutionResult<()> {
        self.checkpoint.checkpoint()?;
        if let Some(DeclarationRef::Callable(id)) = provider.declaration_at(span) {
            if let Some(callable) = self.table.callable(id) {
                out.push(self.callable_result(&callable));
            }
        }
        Ok(())
    }

    fn callable_result(&self, callable: &CallableSymbol) -> DeclarationResult {
        DeclarationResult {
            name: callable.name,
            target: DeclarationRef::Callable(callable.id),
            diagnostics: callable_declaration_diagnostics(self.table, callable),
        }
    }
}

/// Whether the provider reaches `callable` through its own declaration span.
fn is_indexed(provider: &dyn SymbolProvider, callable: &CallableSymbol) -> bool {
    callable
        .source()
        .is_some_and(|s| provider.declaration_at(s.span()) == Some(DeclarationRef::Callable(callable.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::NoCheckpoint;
    use crate::test_support::{class_named, project_with};
    use kestrel_syntax::builder::{expr, SourceBuilder};
    use kestrel_syntax::DeprecationLevel;

    fn unit_kinds(analysis: &UnitAnalysis) -> Vec<DiagnosticKind> {
        analysis.diagnostics().map(|d| d.kind).collect()
    }

    fn check_first_unit(project: &crate::project::Project, module: ModuleId) -> UnitAnalysis {
        let table = project.table().unwrap();
        let unit = table.units_of(module)[0].id();
        UnitChecker::new(&table, &NoCheckpoint).check_unit(unit).unwrap()
    }

    #[test]
    fn test_one_unresolved_among_ten() {
        let mut builder = SourceBuilder::new("ten.kt").package("app");
        for index in 0..10 {
            let body = if index == 6 {
                expr::call("undefined", vec![])
            } else {
                expr::int(index)
            };
            builder = builder.function(&format!("f{}", index), |f| f.returns("Int").body(body));
        }
        let (project, module) = project_with(vec![builder]);
        let analysis = check_first_unit(&project, module);

        assert_eq!(analysis.declarations.len(), 10);
        assert_eq!(unit_kinds(&analysis), vec![DiagnosticKind::UnresolvedReference]);
        let clean = analysis.declarations.iter().filter(|d| d.is_clean()).count();
        assert_eq!(clean, 9);
        assert_eq!(analysis.declarations[6].name, Symbol::intern("f6"));
    }

    #[test]
    fn test_supertype_checks() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Closed", |c| c)
            .class("Child", |c| c.supertype("Closed"))
            .class("Holder", |c| c.type_parameter("T").supertype("T"))
            .interface("A", |c| c.supertype("B"))
            .interface("B", |c| c.supertype("A"))]);
        let analysis = check_first_unit(&project, module);
        let by_name = |name: &str| {
            analysis
                .declarations
                .iter()
                .find(|d| d.name == Symbol::intern(name))
                .map(|d| d.diagnostics.iter().map(|x| x.kind).collect::<Vec<_>>())
                .unwrap()
        };
        assert_eq!(by_name("Child"), vec![DiagnosticKind::FinalSupertype]);
        assert_eq!(by_name("Holder"), vec![DiagnosticKind::SupertypeNotAClassOrInterface]);
        assert_eq!(by_name("A"), vec![DiagnosticKind::CyclicInheritance]);
        assert_eq!(by_name("B"), vec![DiagnosticKind::CyclicInheritance]);

        let table = project.table().unwrap();
        let a = class_named(&table, module, "app.A");
        let cycle = &a.check_diagnostics()[0];
        let declaration = a.declaration().unwrap();
        assert_eq!(cycle.range, declaration.supertypes[0].span);
    }

    #[test]
    fn test_members_follow_their_class() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Box", |c| {
                c.val_param("size", "Int")
                    .function("broken", |f| f.returns("String").body(expr::int(0)))
                    .class("Inner", |c| c.function("lost", |f| f.body(expr::call("nope", vec![]))))
            })
            .function("after", |f| f.body(expr::name("missing")))]);
        let analysis = check_first_unit(&project, module);
        let names: Vec<String> = analysis.declarations.iter().map(|d| d.name.to_string()).collect();
        assert_eq!(names, vec!["Box", "Box", "broken", "Inner", "Inner", "lost", "after"]);
        assert_eq!(
            unit_kinds(&analysis),
            vec![
                DiagnosticKind::TypeMismatch,
                DiagnosticKind::UnresolvedReference,
                DiagnosticKind::UnresolvedReference
            ]
        );
    }

    #[test]
    fn test_warnings_as_errors() {
        let source = || {
            SourceBuilder::new("a.kt")
                .package("app")
                .function("old", |f| f.deprecated(DeprecationLevel::Warning, "old"))
                .function("use", |f| f.body(expr::call("old", vec![])))
        };
        let (project, module) = project_with(vec![source()]);
        let analysis = check_first_unit(&project, module);
        assert_eq!(unit_kinds(&analysis), vec![DiagnosticKind::Deprecation]);
        assert!(!analysis.has_errors());

        let (mut project, module) = project_with(vec![source()]);
        project.configure(|config| config.warnings_as_errors = true);
        let analysis = check_first_unit(&project, module);
        assert_eq!(analysis.error_count(), 1);
    }

    #[test]
    fn test_local_class_diagnostics_stay_in_the_body() {
        let (project, module) = project_with(vec![SourceBuilder::new("a.kt")
            .package("app")
            .class("Sealed", |c| c)
            .function("make", |f| {
                f.body(expr::block(vec![
                    expr::local_class("Local", |c| c.supertype("Sealed")).unwrap(),
                    expr::stmt(expr::call("Local", vec![])),
                ]))
            })]);
        let analysis = check_first_unit(&project, module);
        let make = analysis.declarations.iter().find(|d| d.name == Symbol::intern("make")).unwrap();
        let kinds: Vec<DiagnosticKind> = make.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::FinalSupertype]);
    }

    #[test]
    fn test_failed_module_is_fatal() {
        let (project, module) = crate::test_support::project_with_missing_dependency();
        let table = project.table().unwrap();
        let unit = table.units_of(module)[0].id();
        let result = UnitChecker::new(&table, &NoCheckpoint).check_unit(unit);
        assert!(matches!(result, Err(crate::error::ResolutionError::Configuration(_))));
    }
}
