//! Kestrel semantic analysis.
//!
//! Facade over the syntax layer and the resolution core.

pub use kestrel_checker as checker;
pub use kestrel_syntax as syntax;

pub use kestrel_checker::{
    AnalysisConfig, AnalysisSession, ConfigurationError, Diagnostic, DiagnosticKind, ModuleId, ModuleKind, Project,
    ProjectManifest, RenderedDiagnostic, ResolutionError, SessionAccessError, Severity, Type, UnitAnalysis,
};
pub use kestrel_syntax::{builder, FileId, SourceTree, SourceUnit, Span};

use anyhow::{Context, Result};
use std::path::Path;

/// Load a manifest and check every unit of every source module on the
/// calling thread, one session per module.
pub fn check_project(manifest: &Path) -> Result<Vec<UnitAnalysis>> {
    let project =
        Project::load(manifest).with_context(|| format!("Failed to load project {}", manifest.display()))?;
    check_loaded(&project)
}

pub fn check_loaded(project: &Project) -> Result<Vec<UnitAnalysis>> {
    let mut results = Vec::new();
    for module in project.module_ids() {
        if !matches!(
            project.module_kind(module),
            Some(ModuleKind::Source | ModuleKind::NotUnderContentRoot)
        ) {
            continue;
        }
        let session = project.session(module)?;
        let _guard = session.enter();
        for unit in project.units(module) {
            let analysis = session
                .check_unit(unit.id())
                .with_context(|| format!("Failed to analyse {}", unit.path()))?;
            results.push(analysis);
        }
    }
    Ok(results)
}
