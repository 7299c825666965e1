//! Semantic resolution over a loaded [`Workspace`](formica_syntax::Workspace).
//!
//! Everything here is a specialization of one traversal: the two-stage
//! project-graph walk in [`walker`]. Property questions ([`properties`])
//! ride the walk until the first provider declaring the queried name;
//! target questions ([`targets`]) only need the effective-name map the
//! building stage produces. Each query walks fresh; no state survives
//! between calls except the memo a caller chooses to carry.

pub mod properties;
pub mod targets;
pub mod walker;

pub use properties::{
    expand_for_element, expand_string, property_value, property_variants, providers_in_scope,
    resolve_property, PropertyLookup, PropertyMemo,
};
pub use targets::{
    default_target, duplicate_targets, resolve_target, resolve_targets, DuplicateTarget,
    ResolvedTarget, TargetResolution,
};
pub use walker::{
    DiscoveredTarget, InclusionKind, ProjectWalker, Stage, TargetMap, WalkControl, WalkDelegate,
};
