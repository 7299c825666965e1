//! Build-file workspace: the root file plus the transitive import/include
//! closure, loaded once and shared read-only by the resolution layers.
//!
//! Loading emulates Ant's top-level execution order per file: literal
//! `<property>` definitions accumulate first-wins, `<property file=...>`
//! entries join them, and `<import>`/`<include>` directives recurse, with
//! `${}` placeholders in referenced paths expanded against what has
//! accumulated so far. Only the root file is load-or-fail; every referenced
//! file degrades to a [`LoadDiagnostic`] when missing or broken.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use formica_core::{FileId, LineCol, LineIndex, Location};
use formica_expand::{PropertyExpander, StaticProperties};
use formica_properties::PropertiesFile;

use crate::document::{BuildFile, ElementHandle, ElementId, ElementKind};
use crate::fs::{normalize_path, FileSystem};
use crate::provider::provider_for;
use crate::views::{ImportView, PropertyView};

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Caller-supplied definitions, matching Ant's `-Dname=value`. User
    /// properties shadow build-file definitions and their values are used
    /// verbatim, never re-expanded.
    pub user_properties: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse XML in {path}: {source}")]
    Xml {
        path: PathBuf,
        #[source]
        source: roxmltree::Error,
    },
}

/// A problem with a referenced file, attached to the directive that
/// references it. The load keeps going; resolution just sees less of the
/// graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadDiagnostic {
    pub location: Location,
    pub message: String,
}

/// External `.properties` content, attached to the `<property file=...>`
/// element that pulls it in.
#[derive(Debug, Clone)]
pub struct ExternalPropertyFile {
    pub file: FileId,
    pub path: PathBuf,
    pub entries: PropertiesFile,
}

/// A non-XML file participating in resolution, kept for location mapping.
#[derive(Debug)]
pub struct ResourceFile {
    path: PathBuf,
    text: String,
    line_index: LineIndex,
    entries: PropertiesFile,
}

impl ResourceFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub fn entries(&self) -> &PropertiesFile {
        &self.entries
    }
}

#[derive(Debug)]
enum FileData {
    Build(BuildFile),
    Resource(ResourceFile),
}

impl FileData {
    fn path(&self) -> &Path {
        match self {
            FileData::Build(file) => file.path(),
            FileData::Resource(resource) => resource.path(),
        }
    }
}

/// Content identity of everything the load read, root path included. Two
/// workspaces with equal fingerprints resolve identically, which makes this
/// the registry cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceFingerprint(String);

impl WorkspaceFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct Workspace {
    files: Vec<FileData>,
    by_path: HashMap<PathBuf, FileId>,
    root: FileId,
    /// `id` attribute registrations, first definition wins.
    ids: BTreeMap<String, ElementHandle>,
    /// Directive element to the file it loaded.
    imports: HashMap<ElementHandle, FileId>,
    diagnostics: Vec<LoadDiagnostic>,
    fingerprint: WorkspaceFingerprint,
    user_properties: StaticProperties,
}

impl Workspace {
    pub fn load(
        fs: &dyn FileSystem,
        root: &Path,
        options: &LoadOptions,
    ) -> Result<Self, LoadError> {
        let user_properties: StaticProperties = options
            .user_properties
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect::<StaticProperties>()
            .with_final_values();

        let mut loader = Loader {
            fs,
            user: user_properties.clone(),
            accumulated: StaticProperties::new(),
            files: BTreeMap::new(),
            by_path: HashMap::new(),
            ids: BTreeMap::new(),
            imports: HashMap::new(),
            diagnostics: Vec::new(),
            digest: Sha256::new(),
            next_file: 0,
        };
        let root_id = loader.load_root(normalize_path(root))?;

        Ok(Self {
            // Ids are allocated densely in load order, so the ordered map
            // collapses into an id-indexed vector.
            files: loader.files.into_values().collect(),
            by_path: loader.by_path,
            root: root_id,
            ids: loader.ids,
            imports: loader.imports,
            diagnostics: loader.diagnostics,
            fingerprint: WorkspaceFingerprint(hex::encode(loader.digest.finalize())),
            user_properties,
        })
    }

    pub fn root(&self) -> FileId {
        self.root
    }

    pub fn root_file(&self) -> &BuildFile {
        match &self.files[self.root.to_raw() as usize] {
            FileData::Build(file) => file,
            FileData::Resource(_) => unreachable!("the root is always a build file"),
        }
    }

    pub fn build_file(&self, id: FileId) -> Option<&BuildFile> {
        match self.files.get(id.to_raw() as usize)? {
            FileData::Build(file) => Some(file),
            FileData::Resource(_) => None,
        }
    }

    /// Every build file, in load order (root first).
    pub fn build_files(&self) -> impl Iterator<Item = &BuildFile> {
        self.files.iter().filter_map(|data| match data {
            FileData::Build(file) => Some(file),
            FileData::Resource(_) => None,
        })
    }

    pub fn resource(&self, id: FileId) -> Option<&ResourceFile> {
        match self.files.get(id.to_raw() as usize)? {
            FileData::Resource(resource) => Some(resource),
            FileData::Build(_) => None,
        }
    }

    pub fn file_path(&self, id: FileId) -> Option<&Path> {
        self.files.get(id.to_raw() as usize).map(FileData::path)
    }

    pub fn file_id(&self, path: &Path) -> Option<FileId> {
        self.by_path.get(&normalize_path(path)).copied()
    }

    /// The file a given `<import>`/`<include>` element loaded.
    pub fn imported_file(&self, directive: ElementHandle) -> Option<FileId> {
        self.imports.get(&directive).copied()
    }

    /// The element registered under an `id` attribute value.
    pub fn element_by_id(&self, id: &str) -> Option<ElementHandle> {
        self.ids.get(id).copied()
    }

    pub fn diagnostics(&self) -> &[LoadDiagnostic] {
        &self.diagnostics
    }

    pub fn fingerprint(&self) -> &WorkspaceFingerprint {
        &self.fingerprint
    }

    pub fn user_properties(&self) -> &StaticProperties {
        &self.user_properties
    }

    /// Line/column of a location, in whichever file it points at.
    pub fn line_col(&self, location: Location) -> Option<LineCol> {
        let index = match self.files.get(location.file.to_raw() as usize)? {
            FileData::Build(file) => file.line_index(),
            FileData::Resource(resource) => resource.line_index(),
        };
        Some(index.line_col(location.range.start()))
    }
}

struct Loader<'a> {
    fs: &'a dyn FileSystem,
    user: StaticProperties,
    /// Top-level literal definitions seen so far, across files, in load
    /// order, first definition wins. Used only to expand referenced paths.
    accumulated: StaticProperties,
    files: BTreeMap<u32, FileData>,
    by_path: HashMap<PathBuf, FileId>,
    ids: BTreeMap<String, ElementHandle>,
    imports: HashMap<ElementHandle, FileId>,
    diagnostics: Vec<LoadDiagnostic>,
    digest: Sha256,
    next_file: u32,
}

impl Loader<'_> {
    fn load_root(&mut self, path: PathBuf) -> Result<FileId, LoadError> {
        let text = self
            .fs
            .read_to_string(&path)
            .map_err(|source| LoadError::Io {
                path: path.clone(),
                source,
            })?;
        self.update_digest(&path, &text);
        let id = FileId::from_raw(self.next_file);
        let file =
            BuildFile::parse(id, path.clone(), text).map_err(|source| LoadError::Xml {
                path: path.clone(),
                source,
            })?;
        self.next_file += 1;
        self.by_path.insert(path, id);
        Ok(self.process_file(file))
    }

    fn load_nested(&mut self, path: PathBuf, referrer: Location, optional: bool) -> Option<FileId> {
        if let Some(&id) = self.by_path.get(&path) {
            // Diamond imports and import cycles both land here.
            return Some(id);
        }
        let text = match self.fs.read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                if optional {
                    tracing::debug!(path = %path.display(), "skipping optional import: {err}");
                } else {
                    self.diagnostics.push(LoadDiagnostic {
                        location: referrer,
                        message: format!("cannot read {}: {err}", path.display()),
                    });
                }
                return None;
            }
        };
        self.update_digest(&path, &text);
        let id = FileId::from_raw(self.next_file);
        let file = match BuildFile::parse(id, path.clone(), text) {
            Ok(file) => file,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "imported file does not parse");
                self.diagnostics.push(LoadDiagnostic {
                    location: referrer,
                    message: format!("cannot parse {}: {err}", path.display()),
                });
                return None;
            }
        };
        self.next_file += 1;
        self.by_path.insert(path, id);
        Some(self.process_file(file))
    }

    fn process_file(&mut self, mut file: BuildFile) -> FileId {
        let id = file.id();
        let root = file.root();
        let elements: Vec<ElementId> = file.elements().collect();

        for &element in &elements {
            if let Some(value) = file.attribute(element, "id") {
                let handle = file.handle(element);
                self.ids.entry(value.to_string()).or_insert(handle);
            }
        }

        // Top-level children in document order, the way Ant executes them.
        for element in file.children(root).to_vec() {
            match file.kind(element) {
                ElementKind::Property => self.process_property(&mut file, element, true),
                ElementKind::Import | ElementKind::Include => {
                    self.process_import(&file, element);
                }
                _ => {}
            }
        }

        // Properties nested below the top level still get their external
        // file attached, but their entries stay out of the load-time
        // accumulation since nothing guarantees they ever execute.
        for &element in &elements {
            if file.kind(element) != ElementKind::Property || file.parent(element) == Some(root) {
                continue;
            }
            self.process_property(&mut file, element, false);
        }

        self.files.insert(id.to_raw(), FileData::Build(file));
        id
    }

    fn process_property(&mut self, file: &mut BuildFile, element: ElementId, top_level: bool) {
        let Some(view) = PropertyView::cast(file, element) else {
            return;
        };
        let declared = view.name().map(str::to_string);
        let value = view.value().map(str::to_string);
        let file_attr = view.file_attr().map(str::to_string);
        let prefix = view.prefix().map(str::to_string);

        if top_level {
            if let (Some(name), Some(value)) = (&declared, &value) {
                if !self.accumulated.values().contains_key(name) {
                    self.accumulated.insert(name.clone(), value.clone());
                }
            }
        }

        let Some(raw_path) = file_attr else {
            return;
        };
        let expanded = self.expand_reference(file, &raw_path);
        let resolved = resolve_relative(file.path(), &expanded);
        let Some(external) = self.load_resource(resolved, file.location(element)) else {
            return;
        };

        if top_level {
            for entry in &external.entries.entries {
                let key = match &prefix {
                    Some(prefix) => apply_prefix(prefix, &entry.key),
                    None => entry.key.clone(),
                };
                if !self.accumulated.values().contains_key(&key) {
                    self.accumulated.insert(key, entry.value.clone());
                }
            }
        }
        file.external_properties.insert(element, external);
    }

    fn process_import(&mut self, file: &BuildFile, element: ElementId) {
        let Some(view) = ImportView::cast(file, element) else {
            return;
        };
        let Some(raw) = view.file_attr() else {
            self.diagnostics.push(LoadDiagnostic {
                location: file.location(element),
                message: "directive is missing its file attribute".to_string(),
            });
            return;
        };
        let expanded = self.expand_reference(file, raw);
        let resolved = resolve_relative(file.path(), &expanded);
        tracing::debug!(
            from = %file.path().display(),
            to = %resolved.display(),
            "following {}",
            if view.is_include() { "include" } else { "import" },
        );
        if let Some(sub) = self.load_nested(resolved, file.location(element), view.optional()) {
            self.imports.insert(file.handle(element), sub);
        }
    }

    fn load_resource(&mut self, path: PathBuf, referrer: Location) -> Option<ExternalPropertyFile> {
        if let Some(&id) = self.by_path.get(&path) {
            let entries = match self.files.get(&id.to_raw()) {
                Some(FileData::Resource(resource)) => resource.entries.clone(),
                // Referenced as properties *and* as XML elsewhere; reparse
                // the same text for this referring element.
                Some(FileData::Build(build)) => formica_properties::parse(build.text()),
                None => return None,
            };
            return Some(ExternalPropertyFile { file: id, path, entries });
        }
        let text = match self.fs.read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(path = %path.display(), "unreadable property file: {err}");
                self.diagnostics.push(LoadDiagnostic {
                    location: referrer,
                    message: format!("cannot read property file {}: {err}", path.display()),
                });
                return None;
            }
        };
        self.update_digest(&path, &text);
        let id = FileId::from_raw(self.next_file);
        self.next_file += 1;
        self.by_path.insert(path.clone(), id);

        let entries = formica_properties::parse(&text);
        let line_index = LineIndex::new(&text);
        self.files.insert(
            id.to_raw(),
            FileData::Resource(ResourceFile {
                path: path.clone(),
                text,
                line_index,
                entries: entries.clone(),
            }),
        );
        Some(ExternalPropertyFile { file: id, path, entries })
    }

    /// Expand `${}` in a referenced path against user properties, the
    /// accumulated top-level definitions, and the file's own project
    /// intrinsics, in that order.
    fn expand_reference(&self, file: &BuildFile, raw: &str) -> String {
        let intrinsics = file.project().and_then(|project| provider_for(file, project));
        let mut expander = PropertyExpander::new(raw);
        expander.accept_provider(&self.user);
        expander.accept_provider(&self.accumulated);
        if let Some(provider) = &intrinsics {
            expander.accept_provider(provider);
        }
        expander.into_result()
    }

    fn update_digest(&mut self, path: &Path, text: &str) {
        self.digest.update(path.to_string_lossy().as_bytes());
        self.digest.update([0]);
        self.digest.update(text.as_bytes());
        self.digest.update([0]);
    }
}

/// Join a referenced path onto the referencing file's directory.
fn resolve_relative(referencing_file: &Path, reference: &str) -> PathBuf {
    let base = referencing_file.parent().unwrap_or_else(|| Path::new(""));
    normalize_path(&base.join(reference))
}

fn apply_prefix(prefix: &str, key: &str) -> String {
    if prefix.ends_with('.') {
        format!("{prefix}{key}")
    } else {
        format!("{prefix}.{key}")
    }
}
