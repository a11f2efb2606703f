//! Command implementations for the kestrel CLI

pub mod check;
pub mod deps;
pub mod supertypes;

pub use check::check_command;
pub use deps::deps_command;
pub use supertypes::supertypes_command;

use anyhow::{Context, Result};
use kestrel_checker::{ModuleId, Project};
use std::path::Path;

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    /// Analysis ran and found errors.
    Errors,
}

pub(crate) fn load_project(manifest: &Path) -> Result<Project> {
    Project::load(manifest).with_context(|| format!("Failed to load project {}", manifest.display()))
}

pub(crate) fn module_named(project: &Project, name: &str) -> Result<ModuleId> {
    project
        .module_by_name(name)
        .with_context(|| format!("No module named `{}` in project `{}`", name, project.name()))
}
