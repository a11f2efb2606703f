//! Source locations.
//!
//! Every node of a declaration tree carries a [`Span`]: the unit it belongs to
//! plus a half-open byte range. Trees loaded from JSON may omit spans; those
//! are filled with synthetic, unique ranges when the unit is normalized.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a source unit within a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FileId(u32);

impl FileId {
    pub const fn new(id: u32) -> Self {
        FileId(id)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Byte offset into a source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ByteOffset(u32);

impl ByteOffset {
    pub const fn new(offset: u32) -> Self {
        ByteOffset(offset)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// A half-open range `[start, end)` in a source unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Span {
    #[serde(default)]
    pub file: FileId,
    pub start: ByteOffset,
    pub end: ByteOffset,
}

impl Span {
    pub const DUMMY: Span = Span {
        file: FileId(0),
        start: ByteOffset(0),
        end: ByteOffset(0),
    };

    pub const fn new(file: FileId, start: ByteOffset, end: ByteOffset) -> Self {
        Span { file, start, end }
    }

    pub fn from_offsets(file: FileId, start: u32, end: u32) -> Self {
        Span::new(file, ByteOffset::new(start), ByteOffset::new(end))
    }

    /// A span that was never assigned a real location.
    pub fn is_dummy(&self) -> bool {
        self.start == self.end && self.start.as_u32() == 0
    }

    pub fn len(&self) -> u32 {
        self.end.as_u32().saturating_sub(self.start.as_u32())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `other` lies entirely within `self` (same unit).
    pub fn contains(&self, other: &Span) -> bool {
        self.file == other.file && self.start <= other.start && other.end <= self.end
    }

    /// Smallest span covering both.
    pub fn cover(&self, other: &Span) -> Span {
        Span {
            file: self.file,
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn with_file(self, file: FileId) -> Span {
        Span { file, ..self }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}..{}", self.file, self.start.as_u32(), self.end.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_and_cover() {
        let file = FileId::new(3);
        let outer = Span::from_offsets(file, 0, 20);
        let inner = Span::from_offsets(file, 4, 9);
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(!outer.contains(&inner.with_file(FileId::new(4))));

        let merged = inner.cover(&Span::from_offsets(file, 15, 30));
        assert_eq!(merged, Span::from_offsets(file, 4, 30));
    }

    #[test]
    fn test_dummy_span() {
        assert!(Span::DUMMY.is_dummy());
        assert!(!Span::from_offsets(FileId::new(0), 0, 1).is_dummy());
    }
}
