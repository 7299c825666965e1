//! Custom-tag discovery over a loaded [`Workspace`](formica_syntax::Workspace).
//!
//! `<macrodef>`, `<presetdef>`, `<scriptdef>`, `<typedef>`, `<taskdef>` and
//! `antlib:` namespaces all introduce tags beyond the core vocabulary. The
//! [`CustomTagRegistry`] walks the import graph once, records every such
//! declaration, and answers name lookups afterwards. Class lookups are
//! deferred until a caller asks for an implementation, memoized per entry,
//! and never fatal: a declaration whose class or resource is broken keeps
//! an error string while its siblings stay resolvable.

mod builder;
pub mod builtin;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use formica_classpath::{ClassLoadError, ClassSummary, LoaderContext};
use formica_core::{CancellationToken, Cancelled};
use formica_syntax::{
    BuildFile, ElementHandle, ElementId, QName, Workspace, WorkspaceFingerprint,
};

use crate::builder::RegistryBuilder;

/// Namespace-qualified tag name, the registry's lookup key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl TagKey {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn of(tag: &QName) -> Self {
        Self {
            namespace: tag.namespace.clone(),
            name: tag.local.clone(),
        }
    }
}

/// What sort of declaration produced an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagEntryKind {
    Macro,
    /// `<element>` under a `<macrodef>`, visible only inside it.
    MacroElement,
    Preset,
    Script,
    /// `<element>` under a `<scriptdef>`, visible only inside it.
    ScriptElement,
    Task,
    DataType,
}

impl TagEntryKind {
    /// Whether the tag acts as a task where it appears. Data-type containers
    /// reject task tags, which is what completion filtering needs to know.
    #[must_use]
    pub fn is_task_like(self) -> bool {
        matches!(
            self,
            TagEntryKind::Macro | TagEntryKind::Preset | TagEntryKind::Script | TagEntryKind::Task
        )
    }
}

/// One discovered declaration.
#[derive(Debug)]
pub struct TagEntry {
    pub(crate) key: TagKey,
    pub(crate) kind: TagEntryKind,
    pub(crate) declared_by: ElementHandle,
    /// The macrodef/scriptdef the tag is scoped to, when it is not global.
    pub(crate) scope: Option<ElementHandle>,
    /// Binary class name behind the tag, when the declaration names one.
    /// Macro and preset tags are declaration-only and carry none.
    pub(crate) class_name: Option<String>,
    pub(crate) loader: Option<Arc<LoaderContext>>,
    pub(crate) lookup: OnceLock<Result<ClassSummary, ClassLoadError>>,
}

impl TagEntry {
    pub fn key(&self) -> &TagKey {
        &self.key
    }

    pub fn kind(&self) -> TagEntryKind {
        self.kind
    }

    pub fn declared_by(&self) -> ElementHandle {
        self.declared_by
    }

    pub fn scope(&self) -> Option<ElementHandle> {
        self.scope
    }

    pub fn class_name(&self) -> Option<&str> {
        self.class_name.as_deref()
    }

    /// Class lookup for the entry, computed on first use and memoized.
    /// `None` when the declaration carries no class at all.
    fn resolved(&self) -> Option<&Result<ClassSummary, ClassLoadError>> {
        let class_name = self.class_name.as_deref()?;
        let loader = self.loader.as_ref()?;
        Some(self.lookup.get_or_init(|| loader.load_class(class_name)))
    }
}

/// Immutable lookup over every custom tag a workspace declares. Built once
/// per workspace snapshot, then shared read-only; the lazy per-entry class
/// lookups memoize behind [`OnceLock`], so concurrent readers are fine.
#[derive(Debug)]
pub struct CustomTagRegistry {
    entries: Vec<TagEntry>,
    /// Index of the winning (latest) globally visible entry per key.
    global: BTreeMap<TagKey, usize>,
    /// Resource and loader failures, keyed by the declaration they belong
    /// to. Attributed to the consuming element for antlib namespaces.
    declaration_errors: HashMap<ElementHandle, String>,
}

impl CustomTagRegistry {
    /// Discovers every custom-tag declaration reachable from the workspace
    /// root. Cancellation aborts with [`Cancelled`]; a partial registry is
    /// never returned.
    pub fn build(
        ws: &Workspace,
        options: &RegistryOptions,
        token: &CancellationToken,
    ) -> Result<Self, Cancelled> {
        RegistryBuilder::new(ws, options, token).build()
    }

    /// The class backing a tag, if its declaration named one and the lookup
    /// succeeds. `None` covers unknown tags, declaration-only tags, and
    /// failed lookups alike; [`tag_error`](Self::tag_error) tells the last
    /// two apart.
    pub fn implementation(&self, tag: &QName) -> Option<&ClassSummary> {
        match self.entry(tag)?.resolved()? {
            Ok(summary) => Some(summary),
            Err(_) => None,
        }
    }

    /// Why the tag has no implementation, when the class lookup was
    /// attempted and failed.
    pub fn tag_error(&self, tag: &QName) -> Option<String> {
        match self.entry(tag)?.resolved()? {
            Ok(_) => None,
            Err(err) => Some(err.to_string()),
        }
    }

    /// The element that declared the tag.
    pub fn declaring_element(&self, tag: &QName) -> Option<ElementHandle> {
        self.entry(tag).map(|entry| entry.declared_by)
    }

    /// Resource or parse failure recorded while processing this
    /// declaration, if any.
    pub fn declaration_error(&self, element: ElementHandle) -> Option<&str> {
        self.declaration_errors.get(&element).map(String::as_str)
    }

    pub fn declaration_errors(&self) -> impl Iterator<Item = (ElementHandle, &str)> + '_ {
        self.declaration_errors
            .iter()
            .map(|(handle, message)| (*handle, message.as_str()))
    }

    /// Tag keys offerable inside `parent`: every globally visible tag plus
    /// the `<element>` declarations of the macrodef or scriptdef `parent`
    /// sits in. A data-type parent only offers data types.
    pub fn completion_variants(&self, ws: &Workspace, parent: ElementHandle) -> Vec<&TagKey> {
        let parent_file = ws.build_file(parent.file);
        let data_type_parent =
            parent_file.is_some_and(|file| file.kind(parent.element).is_data_type());

        let mut variants = Vec::new();
        for (key, &index) in &self.global {
            if data_type_parent && self.entries[index].kind.is_task_like() {
                continue;
            }
            variants.push(key);
        }
        for entry in &self.entries {
            let Some(scope) = entry.scope else { continue };
            if scope.file != parent.file {
                continue;
            }
            let Some(file) = parent_file else { continue };
            if is_within(file, scope.element, parent.element) {
                variants.push(&entry.key);
            }
        }
        variants
    }

    /// The winning globally visible entries, in key order.
    pub fn tags(&self) -> impl Iterator<Item = &TagEntry> + '_ {
        self.global.values().map(|&index| &self.entries[index])
    }

    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    fn entry(&self, tag: &QName) -> Option<&TagEntry> {
        let key = TagKey::of(tag);
        if let Some(&index) = self.global.get(&key) {
            return Some(&self.entries[index]);
        }
        // Scoped entries are few; a scan beats carrying a second map.
        self.entries
            .iter()
            .find(|entry| entry.scope.is_some() && entry.key == key)
    }
}

fn is_within(file: &BuildFile, scope: ElementId, element: ElementId) -> bool {
    let mut cursor = Some(element);
    while let Some(current) = cursor {
        if current == scope {
            return true;
        }
        cursor = file.parent(current);
    }
    false
}

/// Knobs for registry construction.
#[derive(Clone, Debug, Default)]
pub struct RegistryOptions {
    /// Loader every declaration-local classpath delegates to, typically
    /// the Ant distribution plus whatever the invoker put on `-lib`.
    pub base_loader: Arc<LoaderContext>,
}

/// Cache of built registries keyed by root build file, validated by the
/// workspace content fingerprint. A mismatch rebuilds; a canceled build is
/// never stored.
#[derive(Debug, Default)]
pub struct RegistryCache {
    inner: Mutex<HashMap<PathBuf, CacheSlot>>,
}

#[derive(Debug)]
struct CacheSlot {
    fingerprint: WorkspaceFingerprint,
    registry: Arc<CustomTagRegistry>,
}

impl RegistryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry for this workspace snapshot, building it on a miss or
    /// a stale fingerprint.
    pub fn registry(
        &self,
        ws: &Workspace,
        options: &RegistryOptions,
        token: &CancellationToken,
    ) -> Result<Arc<CustomTagRegistry>, Cancelled> {
        let root = ws.root_file().path().to_path_buf();
        {
            let cache = self.inner.lock().unwrap_or_else(|err| err.into_inner());
            if let Some(slot) = cache.get(&root) {
                if slot.fingerprint == *ws.fingerprint() {
                    return Ok(slot.registry.clone());
                }
            }
        }
        let registry = Arc::new(CustomTagRegistry::build(ws, options, token)?);
        let mut cache = self.inner.lock().unwrap_or_else(|err| err.into_inner());
        cache.insert(
            root,
            CacheSlot {
                fingerprint: ws.fingerprint().clone(),
                registry: registry.clone(),
            },
        );
        Ok(registry)
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }
}
