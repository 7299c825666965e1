//! The two-stage project-graph walk shared by property and target
//! resolution.
//!
//! Stage one (*building*) traverses the whole import/include closure in
//! execution order: it registers every target under its effective name
//! (applying include prefixes and import aliases), records dependency
//! edges, reports duplicates, and fires the provider hook for elements
//! that execute before any target does. Stage two (*walking*) starts from
//! the context element's enclosing target and walks dependencies before
//! dependents, firing the provider hook for everything a build would have
//! executed by the time the context element runs. A delegate can stop the
//! walk the moment its question is answered.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::collections::btree_map::Entry;

use formica_core::{CancellationToken, Cancelled, FileId};
use formica_syntax::{
    provider_for, BuildFile, ElementHandle, ElementId, ElementKind, ElementProperties, ImportView,
    TargetView, Workspace,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Building,
    Walking,
}

/// How the file a target lives in was reached from the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InclusionKind {
    TopLevel,
    Include,
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    /// Stop all further visiting; the delegate has what it needs.
    Stop,
}

/// A target found during the building stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTarget {
    pub handle: ElementHandle,
    /// The name as written, before prefixing.
    pub raw_name: String,
    /// The project element of the file declaring the target. Duplicate
    /// detection only fires within one project.
    pub project: ElementHandle,
    /// How the declaring file entered the graph.
    pub kind: InclusionKind,
}

/// Effective target names and dependency edges, the product of stage one.
///
/// The same target can sit under several names: its include-qualified name
/// and, for imported files, an alias. Dependency edges are keyed by target
/// identity and hold effective names, resolved by lookup only once the map
/// is complete, so forward and cross-file references work.
#[derive(Debug, Default)]
pub struct TargetMap {
    targets: BTreeMap<String, DiscoveredTarget>,
    depends: HashMap<ElementHandle, Vec<String>>,
}

impl TargetMap {
    pub fn get(&self, effective_name: &str) -> Option<&DiscoveredTarget> {
        self.targets.get(effective_name)
    }

    pub fn contains(&self, effective_name: &str) -> bool {
        self.targets.contains_key(effective_name)
    }

    /// All registrations, ordered by effective name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DiscoveredTarget)> {
        self.targets.iter().map(|(name, target)| (name.as_str(), target))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Effective names of `target`'s declared dependencies.
    pub fn depends_of(&self, target: ElementHandle) -> &[String] {
        self.depends.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Hooks a resolver plugs into the walk. Every method has a no-op default;
/// implementors override the events they care about.
pub trait WalkDelegate {
    /// A target was registered, with its `(raw, effective)` dependency
    /// references. Fires once per target during building.
    fn target_discovered(&mut self, target: &DiscoveredTarget, depends: &[(String, String)]) {
        let _ = (target, depends);
    }

    /// Two targets of the same project ended up under one effective name.
    /// `first` keeps the name.
    fn duplicate_target(
        &mut self,
        effective_name: &str,
        first: &DiscoveredTarget,
        second: &DiscoveredTarget,
    ) {
        let _ = (effective_name, first, second);
    }

    /// A property-defining element was reached, in execution order.
    fn provider_found(&mut self, provider: ElementProperties<'_>) -> WalkControl {
        let _ = provider;
        WalkControl::Continue
    }

    /// A stage finished. Returning [`WalkControl::Stop`] after
    /// [`Stage::Building`] skips the walking stage entirely.
    fn stage_completed(&mut self, stage: Stage, targets: &TargetMap) -> WalkControl {
        let _ = (stage, targets);
        WalkControl::Continue
    }
}

/// Name-prefixing context for one file of the closure.
#[derive(Debug, Clone)]
struct FileContext {
    /// Concatenated `prefix + separator` of every enclosing include.
    /// Applies to target names and to dependency reference text.
    include_prefix: String,
    /// `prefix + separator` of the nearest enclosing import directive, when
    /// the file was reached through one. Applies to target names only.
    import_alias: Option<String>,
    kind: InclusionKind,
}

impl FileContext {
    fn toplevel() -> Self {
        Self {
            include_prefix: String::new(),
            import_alias: None,
            kind: InclusionKind::TopLevel,
        }
    }
}

pub struct ProjectWalker<'w, D: WalkDelegate> {
    ws: &'w Workspace,
    delegate: &'w mut D,
    token: &'w CancellationToken,
    targets: TargetMap,
    visited_files: HashSet<FileId>,
    walked: HashSet<ElementHandle>,
    /// The element the question is being asked from. Visiting stops right
    /// before it: nothing at or after it can affect its own answer.
    context: Option<ElementHandle>,
    /// Enclosing target of `context`; the walking stage starts here.
    context_target: Option<ElementHandle>,
    stopped: bool,
}

impl<'w, D: WalkDelegate> ProjectWalker<'w, D> {
    pub fn new(ws: &'w Workspace, delegate: &'w mut D, token: &'w CancellationToken) -> Self {
        Self {
            ws,
            delegate,
            token,
            targets: TargetMap::default(),
            visited_files: HashSet::new(),
            walked: HashSet::new(),
            context: None,
            context_target: None,
            stopped: false,
        }
    }

    /// Run both stages and hand back the effective-name map.
    pub fn run(mut self, context: Option<ElementHandle>) -> Result<TargetMap, Cancelled> {
        self.context = context;
        self.context_target = context.and_then(|handle| enclosing_target(self.ws, handle));

        self.build_scope(self.ws.root(), FileContext::toplevel())?;
        tracing::debug!(targets = self.targets.len(), "target map built");

        let proceed = self.delegate.stage_completed(Stage::Building, &self.targets);
        if proceed != WalkControl::Stop && !self.stopped {
            self.walk()?;
            self.delegate.stage_completed(Stage::Walking, &self.targets);
        }
        Ok(self.targets)
    }

    fn build_scope(&mut self, file_id: FileId, ctx: FileContext) -> Result<(), Cancelled> {
        self.token.check()?;
        if !self.visited_files.insert(file_id) {
            // Diamond imports: the first path a file is reached through
            // decides its names.
            return Ok(());
        }
        let ws = self.ws;
        let Some(file) = ws.build_file(file_id) else {
            return Ok(());
        };
        let project = file.handle(file.project().unwrap_or_else(|| file.root()));

        // `basedir` and friends come from the project element itself.
        self.visit_single(file, file.root())?;

        for &element in file.children(file.root()) {
            if self.stopped {
                break;
            }
            match file.kind(element) {
                ElementKind::Target => self.register_target(file, element, project, &ctx),
                ElementKind::Import | ElementKind::Include => {
                    self.build_directive(file, element, &ctx)?;
                }
                // Everything else at the top level executes before any
                // target, so its providers are visible everywhere.
                _ => self.visit_deep(file, element)?,
            }
        }
        Ok(())
    }

    fn build_directive(
        &mut self,
        file: &BuildFile,
        element: ElementId,
        ctx: &FileContext,
    ) -> Result<(), Cancelled> {
        let Some(view) = ImportView::cast(file, element) else {
            return Ok(());
        };
        let Some(sub) = self.ws.imported_file(file.handle(element)) else {
            // Unreadable reference; the load already reported it.
            return Ok(());
        };
        let separator = view.prefix_separator();
        let declared_prefix = view
            .prefix()
            .map(str::to_string)
            .or_else(|| self.project_name(sub));

        let sub_ctx = if view.is_include() {
            let contribution = match &declared_prefix {
                Some(prefix) => format!("{prefix}{separator}"),
                // An include with no usable prefix degrades to plain
                // inclusion rather than dropping the file.
                None => String::new(),
            };
            FileContext {
                include_prefix: format!("{}{contribution}", ctx.include_prefix),
                import_alias: None,
                kind: InclusionKind::Include,
            }
        } else {
            FileContext {
                include_prefix: ctx.include_prefix.clone(),
                import_alias: declared_prefix.map(|prefix| format!("{prefix}{separator}")),
                kind: InclusionKind::Import,
            }
        };
        self.build_scope(sub, sub_ctx)
    }

    fn project_name(&self, file_id: FileId) -> Option<String> {
        let file = self.ws.build_file(file_id)?;
        file.attribute(file.project()?, "name").map(str::to_string)
    }

    fn register_target(
        &mut self,
        file: &BuildFile,
        element: ElementId,
        project: ElementHandle,
        ctx: &FileContext,
    ) {
        let Some(view) = TargetView::cast(file, element) else {
            return;
        };
        let Some(raw_name) = view.name() else {
            return;
        };
        let target = DiscoveredTarget {
            handle: file.handle(element),
            raw_name: raw_name.to_string(),
            project,
            kind: ctx.kind,
        };

        // Reference text written inside an included file is read as if the
        // include prefix were prepended; imports leave references alone.
        let depends: Vec<(String, String)> = view
            .depends()
            .into_iter()
            .map(|raw| (raw.to_string(), format!("{}{raw}", ctx.include_prefix)))
            .collect();
        self.targets.depends.insert(
            target.handle,
            depends.iter().map(|(_, effective)| effective.clone()).collect(),
        );

        let qualified = format!("{}{raw_name}", ctx.include_prefix);
        self.register_name(qualified, &target);
        if ctx.kind == InclusionKind::Import {
            if let Some(alias) = &ctx.import_alias {
                self.register_name(
                    format!("{}{alias}{raw_name}", ctx.include_prefix),
                    &target,
                );
            }
        }

        self.delegate.target_discovered(&target, &depends);
    }

    /// First registration wins. A clash between two targets of the same
    /// project is a duplicate; across projects it is the import-override
    /// rule doing its job, silently.
    fn register_name(&mut self, effective_name: String, target: &DiscoveredTarget) {
        match self.targets.targets.entry(effective_name) {
            Entry::Vacant(slot) => {
                slot.insert(target.clone());
            }
            Entry::Occupied(slot) => {
                let existing = slot.get();
                if existing.handle != target.handle && existing.project == target.project {
                    self.delegate.duplicate_target(slot.key(), existing, target);
                }
            }
        }
    }

    fn walk(&mut self) -> Result<(), Cancelled> {
        if let Some(start) = self.context_target {
            self.walk_target(start)?;
        }
        // Exhaustive sweep for unscoped queries; name order keeps it
        // deterministic.
        let leftovers: Vec<ElementHandle> =
            self.targets.targets.values().map(|t| t.handle).collect();
        for target in leftovers {
            if self.stopped {
                break;
            }
            self.walk_target(target)?;
        }
        Ok(())
    }

    fn walk_target(&mut self, target: ElementHandle) -> Result<(), Cancelled> {
        self.token.check()?;
        if self.stopped || !self.walked.insert(target) {
            return Ok(());
        }
        // Dependencies run first; anything they define is visible to the
        // dependent.
        let depends: Vec<String> = self
            .targets
            .depends
            .get(&target)
            .cloned()
            .unwrap_or_default();
        for dependency in depends {
            if self.stopped {
                return Ok(());
            }
            let resolved = self.targets.targets.get(&dependency).map(|t| t.handle);
            if let Some(dependency) = resolved {
                self.walk_target(dependency)?;
            }
        }
        if self.stopped {
            return Ok(());
        }
        if self.context == Some(target) {
            // The question comes from the target's own header; its body has
            // not run yet.
            self.stopped = true;
            return Ok(());
        }
        let Some(file) = self.ws.build_file(target.file) else {
            return Ok(());
        };
        for &child in file.children(target.element) {
            if self.stopped {
                break;
            }
            self.visit_deep(file, child)?;
        }
        Ok(())
    }

    /// Context check plus provider hook for one element.
    fn visit_single(&mut self, file: &BuildFile, element: ElementId) -> Result<(), Cancelled> {
        self.token.check()?;
        if self.stopped {
            return Ok(());
        }
        if self.context == Some(file.handle(element)) {
            self.stopped = true;
            return Ok(());
        }
        if let Some(provider) = provider_for(file, element) {
            if self.delegate.provider_found(provider) == WalkControl::Stop {
                self.stopped = true;
            }
        }
        Ok(())
    }

    fn visit_deep(&mut self, file: &BuildFile, element: ElementId) -> Result<(), Cancelled> {
        self.visit_single(file, element)?;
        if self.stopped {
            return Ok(());
        }
        for &child in file.children(element) {
            if self.stopped {
                break;
            }
            self.visit_deep(file, child)?;
        }
        Ok(())
    }
}

/// The target enclosing `handle`, or `handle` itself when it is one.
pub(crate) fn enclosing_target(ws: &Workspace, handle: ElementHandle) -> Option<ElementHandle> {
    let file = ws.build_file(handle.file)?;
    if file.kind(handle.element) == ElementKind::Target {
        return Some(handle);
    }
    file.ancestor_of_kind(handle.element, ElementKind::Target)
        .map(|el| file.handle(el))
}
