//! Core shared types for Formica.
//!
//! This crate is intentionally small and nearly dependency-free.

mod cancel;
mod text;

pub use cancel::{CancellationToken, Cancelled};
pub use text::{LineCol, LineIndex, TextRange, TextSize};

/// A stable identifier for a loaded build file within one workspace.
///
/// Ids are allocated densely starting at zero, in load order, and are only
/// meaningful relative to the workspace that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }
}

/// A source location: a byte range inside one loaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: FileId,
    pub range: TextRange,
}

impl Location {
    #[inline]
    pub const fn new(file: FileId, range: TextRange) -> Self {
        Self { file, range }
    }
}
