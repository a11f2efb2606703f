//! Syntax layer for the Kestrel analyzer.
//!
//! The analyzer never parses text. It consumes immutable declaration trees
//! (`SourceTree`) handed over by a parser or built with [`builder`], normalized
//! into [`SourceUnit`]s that provide stable expression ids and the
//! `(unit, range) -> declaration` lookup.

pub mod builder;
pub mod error;
pub mod source;
pub mod span;
pub mod symbol;
pub mod tree;
pub mod type_ref;

pub use error::{Result, SyntaxError};
pub use source::SourceUnit;
pub use span::{ByteOffset, FileId, Span};
pub use symbol::{symbols, QualifiedName, Symbol};
pub use tree::*;
pub use type_ref::{TypeArgumentRef, TypeRef, TypeRefKind};
