//! Fixtures shared by the unit tests.

use crate::config::AnalysisConfig;
use crate::modules::ModuleKind;
use crate::project::Project;
use crate::symbol_table::SymbolTable;
use crate::symbols::{CallableSymbol, ClassifierSymbol, ModuleId};
use kestrel_syntax::builder::SourceBuilder;
use kestrel_syntax::{QualifiedName, Symbol};
use std::sync::Arc;

/// One source module `main` (always `ModuleId(1)`) holding every unit.
pub fn project_with(units: Vec<SourceBuilder>) -> (Project, ModuleId) {
    let mut project = Project::new("test", AnalysisConfig::default()).unwrap();
    let module = project.add_module("main", ModuleKind::Source).unwrap();
    for unit in units {
        project.add_unit(module, unit.build().unwrap()).unwrap();
    }
    (project, module)
}

pub fn project_with_missing_dependency() -> (Project, ModuleId) {
    let (mut project, module) = project_with(vec![SourceBuilder::new("a.kt").package("app").class("A", |c| c)]);
    project.add_dependency(module, "ghost").unwrap();
    (project, module)
}

pub fn class_named(table: &SymbolTable, module: ModuleId, name: &str) -> Arc<ClassifierSymbol> {
    let provider = table.provider_of(module).unwrap();
    let id = provider
        .classifier(&QualifiedName::parse(name))
        .unwrap_or_else(|| panic!("no classifier {}", name));
    table.class(id).unwrap()
}

pub fn top_level(table: &SymbolTable, module: ModuleId, package: &str, name: &str) -> Arc<CallableSymbol> {
    let provider = table.provider_of(module).unwrap();
    provider
        .top_level_callables(&QualifiedName::parse(package), Symbol::intern(name))
        .first()
        .and_then(|id| table.callable(*id))
        .unwrap_or_else(|| panic!("no top-level callable {}.{}", package, name))
}
