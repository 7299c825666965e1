//! Registry construction: one recursive pass over the import graph.
//!
//! The walk visits every element of every reachable build file in document
//! order. Declarations register as they are met, so a later `<typedef>`
//! overrides an earlier one the same way the runtime's definition table
//! does. Class loading never happens here; declarations only capture the
//! loader context they would use.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use formica_classpath::{ClasspathEntry, DiskFileSet, LoaderContext};
use formica_core::{CancellationToken, Cancelled, FileId};
use formica_resolve::expand_string;
use formica_syntax::{
    normalize_path, BuildFile, ElementHandle, ElementId, ElementKind, FilesProvider, MacroDefView,
    ScriptDefView, TypeDefView, Workspace,
};

use crate::{builtin, CustomTagRegistry, RegistryOptions, TagEntry, TagEntryKind, TagKey};

pub(crate) struct RegistryBuilder<'a> {
    ws: &'a Workspace,
    options: &'a RegistryOptions,
    token: &'a CancellationToken,
    entries: Vec<TagEntry>,
    global: BTreeMap<TagKey, usize>,
    declaration_errors: HashMap<ElementHandle, String>,
    visited_files: HashSet<FileId>,
    visited_namespaces: HashSet<String>,
    /// Loader contexts shared between declarations naming the same
    /// `loaderref`. The declaration that creates one decides its classpath.
    named_loaders: HashMap<String, Arc<LoaderContext>>,
}

impl<'a> RegistryBuilder<'a> {
    pub(crate) fn new(
        ws: &'a Workspace,
        options: &'a RegistryOptions,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            ws,
            options,
            token,
            entries: Vec::new(),
            global: BTreeMap::new(),
            declaration_errors: HashMap::new(),
            visited_files: HashSet::new(),
            visited_namespaces: HashSet::new(),
            named_loaders: HashMap::new(),
        }
    }

    pub(crate) fn build(mut self) -> Result<CustomTagRegistry, Cancelled> {
        self.process_file(self.ws.root())?;
        tracing::debug!(
            tags = self.global.len(),
            errors = self.declaration_errors.len(),
            "custom tag registry built"
        );
        Ok(CustomTagRegistry {
            entries: self.entries,
            global: self.global,
            declaration_errors: self.declaration_errors,
        })
    }

    fn process_file(&mut self, id: FileId) -> Result<(), Cancelled> {
        if !self.visited_files.insert(id) {
            return Ok(());
        }
        let ws = self.ws;
        let Some(file) = ws.build_file(id) else {
            return Ok(());
        };
        for element in file.elements() {
            self.token.check()?;
            self.scan_antlib_namespaces(file, element);
            match file.kind(element) {
                ElementKind::Import | ElementKind::Include => {
                    if let Some(next) = ws.imported_file(file.handle(element)) {
                        self.process_file(next)?;
                    }
                }
                ElementKind::MacroDef => self.register_macrodef(file, element),
                ElementKind::PresetDef => self.register_presetdef(file, element),
                ElementKind::ScriptDef => self.register_scriptdef(file, element)?,
                ElementKind::TypeDef | ElementKind::TaskDef => {
                    self.register_typedef(file, element)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// `antlib:`-prefixed namespaces implicitly load `antlib.xml` from the
    /// namespace-derived path. Errors attach to the first element seen with
    /// the namespace in scope, which is the one that declared it.
    fn scan_antlib_namespaces(&mut self, file: &BuildFile, element: ElementId) {
        for (_, uri) in file.namespaces_in_scope(element) {
            let Some(package) = uri.strip_prefix("antlib:") else {
                continue;
            };
            if !self.visited_namespaces.insert(uri.clone()) {
                continue;
            }
            let logical = format!("{}/antlib.xml", package.replace('.', "/"));
            let consumer = file.handle(element);
            let loader = self.options.base_loader.clone();
            match loader.open_resource(&logical) {
                Ok(Some(bytes)) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.register_antlib_text(consumer, Some(uri.as_str()), &logical, text, &loader);
                    }
                    Err(_) => {
                        self.declaration_errors
                            .insert(consumer, format!("resource {logical} is not valid UTF-8"));
                    }
                },
                Ok(None) => {
                    self.declaration_errors
                        .insert(consumer, format!("antlib resource {logical} not found"));
                }
                Err(err) => {
                    self.declaration_errors.insert(consumer, err.to_string());
                }
            }
        }
    }

    fn register_macrodef(&mut self, file: &BuildFile, element: ElementId) {
        let Some(view) = MacroDefView::cast(file, element) else {
            return;
        };
        let Some(name) = view.name() else {
            return;
        };
        let handle = file.handle(element);
        let namespace = view.uri().map(str::to_owned);
        self.insert(declaration_only(
            TagKey {
                namespace,
                name: name.to_owned(),
            },
            TagEntryKind::Macro,
            handle,
            None,
        ));
        // Nested <element> declarations are tags too, but only inside the
        // macro body.
        for (child, child_name) in view.elements() {
            self.insert(declaration_only(
                TagKey::named(child_name),
                TagEntryKind::MacroElement,
                file.handle(child),
                Some(handle),
            ));
        }
    }

    fn register_presetdef(&mut self, file: &BuildFile, element: ElementId) {
        let Some(name) = file.attribute(element, "name") else {
            return;
        };
        let namespace = file.attribute(element, "uri").map(str::to_owned);
        self.insert(declaration_only(
            TagKey {
                namespace,
                name: name.to_owned(),
            },
            TagEntryKind::Preset,
            file.handle(element),
            None,
        ));
    }

    fn register_scriptdef(&mut self, file: &BuildFile, element: ElementId) -> Result<(), Cancelled> {
        let Some(view) = ScriptDefView::cast(file, element) else {
            return Ok(());
        };
        let Some(name) = view.name() else {
            return Ok(());
        };
        let handle = file.handle(element);
        let namespace = view.uri().map(str::to_owned);
        self.insert(declaration_only(
            TagKey {
                namespace,
                name: name.to_owned(),
            },
            TagEntryKind::Script,
            handle,
            None,
        ));

        let nested = view.elements();
        if nested.is_empty() {
            return Ok(());
        }
        let loader = if nested.iter().any(|scripted| scripted.classname.is_some()) {
            Some(self.declaration_loader(file, element)?)
        } else {
            None
        };
        for script_element in nested {
            let mut entry = declaration_only(
                TagKey::named(script_element.name),
                TagEntryKind::ScriptElement,
                file.handle(script_element.element),
                Some(handle),
            );
            if let Some(classname) = script_element.classname {
                entry.class_name = Some(classname.to_owned());
                entry.loader = loader.clone();
            } else if let Some((class, copied_loader)) = script_element
                .type_name
                .and_then(|type_name| self.known_type(type_name))
            {
                entry.class_name = Some(class);
                entry.loader = Some(copied_loader);
            }
            self.insert(entry);
        }
        Ok(())
    }

    fn register_typedef(&mut self, file: &BuildFile, element: ElementId) -> Result<(), Cancelled> {
        let Some(view) = TypeDefView::cast(file, element) else {
            return Ok(());
        };
        let handle = file.handle(element);
        let kind = if view.is_task() {
            TagEntryKind::Task
        } else {
            TagEntryKind::DataType
        };
        let namespace = view.uri().map(str::to_owned);

        if let (Some(name), Some(classname)) = (view.name(), view.classname()) {
            let loader = self.declaration_loader(file, element)?;
            self.insert(class_backed(
                TagKey {
                    namespace,
                    name: name.to_owned(),
                },
                kind,
                handle,
                classname.to_owned(),
                loader,
            ));
        } else if let Some(resource) = view.resource() {
            // Bulk form: every entry of the resource becomes one
            // registration.
            let logical = expand_string(self.ws, resource, Some(handle), self.token)?;
            let loader = self.declaration_loader(file, element)?;
            match loader.open_resource(&logical) {
                Ok(Some(bytes)) => {
                    self.register_resource(handle, kind, namespace.as_deref(), &logical, &bytes, &loader);
                }
                Ok(None) => {
                    self.declaration_errors
                        .insert(handle, format!("resource {logical} not found"));
                }
                Err(err) => {
                    self.declaration_errors.insert(handle, err.to_string());
                }
            }
        } else if let Some(file_attr) = view.file_attr() {
            let expanded = expand_string(self.ws, file_attr, Some(handle), self.token)?;
            let path = self.resolve_relative(file, &expanded);
            let loader = self.declaration_loader(file, element)?;
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let name = path.to_string_lossy().into_owned();
                    self.register_resource(handle, kind, namespace.as_deref(), &name, &bytes, &loader);
                }
                Err(err) => {
                    self.declaration_errors
                        .insert(handle, format!("{}: {err}", path.display()));
                }
            }
        }
        Ok(())
    }

    /// Registers the entries a typedef resource describes. XML resources
    /// use the antlib format; anything else is read as a properties file
    /// mapping tag names to class names.
    fn register_resource(
        &mut self,
        declared_by: ElementHandle,
        kind: TagEntryKind,
        namespace: Option<&str>,
        resource: &str,
        bytes: &[u8],
        loader: &Arc<LoaderContext>,
    ) {
        let Ok(text) = std::str::from_utf8(bytes) else {
            self.declaration_errors
                .insert(declared_by, format!("resource {resource} is not valid UTF-8"));
            return;
        };
        if resource.ends_with(".xml") {
            self.register_antlib_text(declared_by, namespace, resource, text, loader);
            return;
        }
        let parsed = formica_properties::parse(text);
        for entry in &parsed.entries {
            if entry.value.is_empty() {
                continue;
            }
            self.insert(class_backed(
                TagKey {
                    namespace: namespace.map(str::to_owned),
                    name: entry.key.clone(),
                },
                kind,
                declared_by,
                entry.value.clone(),
                loader.clone(),
            ));
        }
    }

    fn register_antlib_text(
        &mut self,
        declared_by: ElementHandle,
        namespace: Option<&str>,
        resource: &str,
        text: &str,
        loader: &Arc<LoaderContext>,
    ) {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = match roxmltree::Document::parse_with_options(text, options) {
            Ok(doc) => doc,
            Err(err) => {
                self.declaration_errors
                    .insert(declared_by, format!("cannot parse {resource}: {err}"));
                return;
            }
        };
        let root = doc.root_element();
        if root.tag_name().name() != "antlib" {
            self.declaration_errors
                .insert(declared_by, format!("{resource} is not an antlib descriptor"));
            return;
        }
        for node in root.children().filter(|node| node.is_element()) {
            let kind = match node.tag_name().name() {
                "taskdef" => TagEntryKind::Task,
                "typedef" => TagEntryKind::DataType,
                _ => continue,
            };
            let (Some(name), Some(classname)) = (node.attribute("name"), node.attribute("classname"))
            else {
                continue;
            };
            self.insert(class_backed(
                TagKey {
                    namespace: namespace.map(str::to_owned),
                    name: name.to_owned(),
                },
                kind,
                declared_by,
                classname.to_owned(),
                loader.clone(),
            ));
        }
    }

    /// Class behind an already-known tag name, core tables included. Used
    /// when a scriptdef element copies its type from another definition.
    fn known_type(&self, name: &str) -> Option<(String, Arc<LoaderContext>)> {
        if let Some(class) = builtin::core_task_class(name).or_else(|| builtin::core_type_class(name))
        {
            return Some((class.to_owned(), self.options.base_loader.clone()));
        }
        let index = *self.global.get(&TagKey::named(name))?;
        let entry = &self.entries[index];
        let class = entry.class_name.clone()?;
        let loader = entry
            .loader
            .clone()
            .unwrap_or_else(|| self.options.base_loader.clone());
        Some((class, loader))
    }

    /// Code-loading context for one declaration: its `classpath` attribute,
    /// `classpathref`, and nested path-like children, delegating to the
    /// base loader. `loaderref` shares one context between declarations.
    fn declaration_loader(
        &mut self,
        file: &BuildFile,
        element: ElementId,
    ) -> Result<Arc<LoaderContext>, Cancelled> {
        let loader_ref = file.attribute_ci(element, "loaderref").map(str::to_owned);
        if let Some(name) = &loader_ref {
            if let Some(existing) = self.named_loaders.get(name) {
                return Ok(existing.clone());
            }
        }
        let mut in_progress = BTreeSet::new();
        in_progress.insert(file.handle(element));
        let mut entries = Vec::new();
        self.collect_classpath(file, element, &mut entries, &mut in_progress)?;
        let loader = if entries.is_empty() {
            self.options.base_loader.clone()
        } else {
            Arc::new(LoaderContext::with_parent(
                entries,
                self.options.base_loader.clone(),
            ))
        };
        if let Some(name) = loader_ref {
            self.named_loaders.insert(name, loader.clone());
        }
        Ok(loader)
    }

    fn collect_classpath(
        &mut self,
        file: &BuildFile,
        element: ElementId,
        entries: &mut Vec<ClasspathEntry>,
        in_progress: &mut BTreeSet<ElementHandle>,
    ) -> Result<(), Cancelled> {
        self.token.check()?;
        if let Some(attr) = file.attribute(element, "classpath") {
            let expanded = expand_string(self.ws, attr, Some(file.handle(element)), self.token)?;
            self.push_path_string(file, &expanded, entries);
        }
        if let Some(refid) = file.attribute_ci(element, "classpathref") {
            self.collect_reference(refid, entries, in_progress)?;
        }
        for &child in file.children(element) {
            if file.kind(child) == ElementKind::PathLike {
                self.collect_path_element(file, child, entries, in_progress)?;
            }
        }
        Ok(())
    }

    /// Flattens one `<path>`/`<classpath>`/`<pathelement>` subtree. The
    /// in-progress set breaks `refid` cycles and deduplicates repeated
    /// references to the same path.
    fn collect_path_element(
        &mut self,
        file: &BuildFile,
        element: ElementId,
        entries: &mut Vec<ClasspathEntry>,
        in_progress: &mut BTreeSet<ElementHandle>,
    ) -> Result<(), Cancelled> {
        self.token.check()?;
        let handle = file.handle(element);
        if !in_progress.insert(handle) {
            tracing::debug!(file = %file.path().display(), "classpath reference cycle");
            return Ok(());
        }
        if let Some(attr) = file.attribute(element, "location") {
            let expanded = expand_string(self.ws, attr, Some(handle), self.token)?;
            entries.push(ClasspathEntry::from_path(
                self.resolve_relative(file, &expanded),
            ));
        }
        if let Some(attr) = file.attribute(element, "path") {
            let expanded = expand_string(self.ws, attr, Some(handle), self.token)?;
            self.push_path_string(file, &expanded, entries);
        }
        if let Some(refid) = file.attribute(element, "refid") {
            self.collect_reference(refid, entries, in_progress)?;
        }
        for &child in file.children(element) {
            match file.kind(child) {
                ElementKind::PathLike | ElementKind::PathElement => {
                    self.collect_path_element(file, child, entries, in_progress)?;
                }
                ElementKind::FileSet => self.collect_fileset(file, child, entries)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_reference(
        &mut self,
        refid: &str,
        entries: &mut Vec<ClasspathEntry>,
        in_progress: &mut BTreeSet<ElementHandle>,
    ) -> Result<(), Cancelled> {
        let Some(target) = self.ws.element_by_id(refid) else {
            tracing::debug!(refid, "unresolved classpath reference");
            return Ok(());
        };
        let Some(file) = self.ws.build_file(target.file) else {
            return Ok(());
        };
        self.collect_path_element(file, target.element, entries, in_progress)
    }

    /// A `<fileset>` contributes its archive files. Pattern sets are not
    /// modeled, so every jar and zip under the directory counts.
    fn collect_fileset(
        &mut self,
        file: &BuildFile,
        element: ElementId,
        entries: &mut Vec<ClasspathEntry>,
    ) -> Result<(), Cancelled> {
        let Some(dir) = file.attribute(element, "dir") else {
            return Ok(());
        };
        let expanded = expand_string(self.ws, dir, Some(file.handle(element)), self.token)?;
        let root = self.resolve_relative(file, &expanded);
        for path in DiskFileSet::new(root).files(&BTreeSet::new()) {
            if is_archive(&path) {
                entries.push(ClasspathEntry::from_path(path));
            }
        }
        Ok(())
    }

    fn push_path_string(&self, file: &BuildFile, value: &str, entries: &mut Vec<ClasspathEntry>) {
        for piece in split_path_string(value) {
            entries.push(ClasspathEntry::from_path(self.resolve_relative(file, piece)));
        }
    }

    /// Relative paths count from the declaring file's directory.
    fn resolve_relative(&self, file: &BuildFile, value: &str) -> PathBuf {
        let path = Path::new(value);
        if path.is_absolute() {
            return normalize_path(path);
        }
        match file.path().parent() {
            Some(parent) => normalize_path(&parent.join(path)),
            None => normalize_path(path),
        }
    }

    fn insert(&mut self, entry: TagEntry) {
        let index = self.entries.len();
        if entry.scope.is_none() {
            // A later declaration overrides an earlier one, as the
            // runtime's definition table does.
            self.global.insert(entry.key.clone(), index);
        }
        self.entries.push(entry);
    }
}

fn declaration_only(
    key: TagKey,
    kind: TagEntryKind,
    declared_by: ElementHandle,
    scope: Option<ElementHandle>,
) -> TagEntry {
    TagEntry {
        key,
        kind,
        declared_by,
        scope,
        class_name: None,
        loader: None,
        lookup: OnceLock::new(),
    }
}

fn class_backed(
    key: TagKey,
    kind: TagEntryKind,
    declared_by: ElementHandle,
    class_name: String,
    loader: Arc<LoaderContext>,
) -> TagEntry {
    TagEntry {
        key,
        kind,
        declared_by,
        scope: None,
        class_name: Some(class_name),
        loader: Some(loader),
        lookup: OnceLock::new(),
    }
}

/// Splits an Ant path string. Both `;` and `:` separate entries; a lone
/// letter before a `:` is read as a Windows drive prefix instead.
fn split_path_string(value: &str) -> Vec<&str> {
    let bytes = value.as_bytes();
    let mut pieces = Vec::new();
    let mut start = 0;
    for (index, &byte) in bytes.iter().enumerate() {
        let separator = byte == b';'
            || (byte == b':' && !(index == start + 1 && bytes[start].is_ascii_alphabetic()));
        if separator {
            pieces.push(&value[start..index]);
            start = index + 1;
        }
    }
    pieces.push(&value[start..]);
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect()
}

fn is_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jar") || ext.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn path_strings_split_on_both_separators() {
        assert_eq!(split_path_string("a.jar;b.jar"), vec!["a.jar", "b.jar"]);
        assert_eq!(
            split_path_string("lib/a.jar:lib/b.jar"),
            vec!["lib/a.jar", "lib/b.jar"]
        );
    }

    #[test]
    fn drive_letters_are_not_separators() {
        assert_eq!(
            split_path_string(r"C:\lib\a.jar;D:\lib\b.jar"),
            vec![r"C:\lib\a.jar", r"D:\lib\b.jar"]
        );
    }

    #[test]
    fn blank_pieces_are_dropped() {
        assert_eq!(split_path_string("a.jar;;  ;b.jar"), vec!["a.jar", "b.jar"]);
        assert_eq!(split_path_string(""), Vec::<&str>::new());
    }

    #[test]
    fn archives_are_recognized_by_extension() {
        assert!(is_archive(Path::new("lib/tool.jar")));
        assert!(is_archive(Path::new("lib/TOOL.ZIP")));
        assert!(!is_archive(Path::new("lib/tool.class")));
        assert!(!is_archive(Path::new("lib/tool")));
    }
}
