//! Kestrel resolution core.
//!
//! Symbols are created lazily by per-module providers and advanced through
//! resolution phases on demand. Call resolution, inference and the unit
//! checker sit on top of the symbol table; sessions pin a table generation and
//! guard every read with a validity token.

pub mod builtins;
pub mod body;
pub mod call_resolver;
pub mod checker;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod inference;
pub mod lifetime;
pub mod members;
pub mod modules;
pub mod phases;
pub mod project;
pub mod providers;
pub mod scope;
pub mod session;
pub mod subtyping;
pub mod supertypes;
pub mod symbol_table;
pub mod symbols;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-export the public surface
pub use body::{BodyResolution, ResolvedReference};
pub use call_resolver::{Call, CallResolution, CallResolver, ResolvedCall};
pub use checker::{DeclarationResult, UnitAnalysis, UnitChecker};
pub use config::{AnalysisConfig, ConfigError, ModuleKindConfig, ModuleManifest, ProjectManifest};
pub use diagnostics::{render, Diagnostic, DiagnosticKind, RenderedDiagnostic, Severity};
pub use error::{ConfigurationError, ResolutionError, ResolutionResult};
pub use lifetime::{AccessPolicy, Checkpoint, SessionAccessError, SessionId, SessionRegistry, ValidityToken};
pub use modules::{ModuleDatabase, ModuleGraph, ModuleKind};
pub use project::{Project, ProjectError};
pub use providers::{BinaryMetadata, JsonLibraryMetadata, LibraryDescription, SymbolProvider};
pub use session::{AnalysisSession, CallableHandle, ClassHandle};
pub use symbol_table::SymbolTable;
pub use symbols::{CallableId, ClassId, ModuleId, Phase};
pub use types::{substitute, Substitution, Type};
