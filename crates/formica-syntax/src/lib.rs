//! Read model for Ant build files.
//!
//! This crate owns everything between raw XML text and the resolution
//! engine:
//! - per-file parsing into an immutable element arena with a closed
//!   [`ElementKind`] classification ([`document`]),
//! - typed views over well-known elements ([`views`]),
//! - the recursive element walk ([`visitor`]),
//! - element-backed property providers ([`provider`]),
//! - the multi-file [`Workspace`]: import/include following, reference-by-id
//!   registry, external property files, and the content fingerprint caches
//!   key off of ([`workspace`]).

pub mod document;
pub mod files;
pub mod fs;
pub mod provider;
pub mod views;
pub mod visitor;
pub mod workspace;

pub use document::{Attribute, BuildFile, ElementHandle, ElementId, ElementKind, QName};
pub use files::FilesProvider;
pub use fs::{normalize_path, FileSystem, LocalFs, MemoryFs};
pub use provider::{provider_for, ElementProperties};
pub use views::{
    ImportView, MacroDefView, ProjectView, PropertyView, ScriptDefView, ScriptElement, TargetView,
    TypeDefView,
};
pub use visitor::{walk_children, walk_element, ElementVisitor};
pub use workspace::{
    ExternalPropertyFile, LoadDiagnostic, LoadError, LoadOptions, ResourceFile, Workspace,
    WorkspaceFingerprint,
};
