//! Fatal errors of the analyzer.
//!
//! Problems in the analysed code are never errors here; they are diagnostics.
//! The types below describe misuse of the engine or a broken project setup and
//! end the current top-level request.

use crate::lifetime::SessionAccessError;
use crate::symbols::ModuleId;
use kestrel_syntax::FileId;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("module `{module}` depends on unknown module `{dependency}`")]
    UnknownDependency { module: String, dependency: String },

    #[error("library module `{module}` has no registered metadata")]
    MissingMetadata { module: String },

    #[error("module `{module}` failed dependency resolution: {reason}")]
    FailedModule { module: String, reason: String },

    #[error("module `{0}` is declared twice")]
    DuplicateModule(String),

    #[error("unknown module {0}")]
    UnknownModule(ModuleId),

    #[error("no module named `{0}`")]
    UnknownModuleName(String),

    #[error("unknown source unit {0}")]
    UnknownUnit(FileId),

    #[error("library metadata for `{module}` is malformed: {message}")]
    MalformedMetadata { module: String, message: String },
}

/// Failure of a resolution request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Session(#[from] SessionAccessError),
}

pub type ResolutionResult<T> = Result<T, ResolutionError>;
