//! A single parsed build file: an immutable element arena with kind
//! classification, attributes, in-scope namespaces, and source ranges.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use formica_core::{FileId, LineIndex, Location, TextRange, TextSize};

use crate::workspace::ExternalPropertyFile;

/// Index of an element within its [`BuildFile`] arena, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(u32);

impl ElementId {
    #[inline]
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A cross-file element address. Two handles are equal exactly when they
/// denote the same underlying element, which is how target identity works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementHandle {
    pub file: FileId,
    pub element: ElementId,
}

/// An element name with its resolved namespace URI, if any.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub local: String,
    pub namespace: Option<String>,
}

impl QName {
    pub fn new(local: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            local: local.into(),
            namespace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Closed classification of the element vocabulary the resolution engine
/// cares about. Anything else, including candidate custom tags, is
/// [`Other`](ElementKind::Other).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Project,
    Target,
    Import,
    Include,
    /// `<property>` and `<loadproperties>`.
    Property,
    Available,
    Condition,
    Uptodate,
    Tstamp,
    AntCall,
    /// `<param>` under `<antcall>`.
    AntCallParam,
    MacroDef,
    /// `<attribute>` under `<macrodef>`.
    MacroAttribute,
    /// `<element>` under `<macrodef>`.
    MacroElement,
    PresetDef,
    ScriptDef,
    /// `<element>` under `<scriptdef>`.
    ScriptDefElement,
    TypeDef,
    TaskDef,
    /// `<path>` and `<classpath>`.
    PathLike,
    PathElement,
    /// `<fileset>`, `<dirset>`, `<filelist>`, `<zipfileset>`.
    FileSet,
    Other,
}

impl ElementKind {
    /// Data-type elements, as opposed to tasks. Used when filtering
    /// completion variants for a structural parent.
    #[must_use]
    pub fn is_data_type(self) -> bool {
        matches!(
            self,
            ElementKind::PathLike | ElementKind::PathElement | ElementKind::FileSet
        )
    }
}

#[derive(Debug)]
struct ElementData {
    tag: QName,
    kind: ElementKind,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    attributes: Vec<Attribute>,
    range: TextRange,
    /// Namespaces in scope, as (prefix, uri) pairs. Shared with the parent
    /// when the element declares none of its own.
    namespaces: Arc<[(Option<String>, String)]>,
}

/// One parsed build file.
#[derive(Debug)]
pub struct BuildFile {
    id: FileId,
    path: PathBuf,
    text: String,
    line_index: LineIndex,
    elements: Vec<ElementData>,
    root: ElementId,
    pub(crate) external_properties: HashMap<ElementId, ExternalPropertyFile>,
}

impl BuildFile {
    pub(crate) fn parse(id: FileId, path: PathBuf, text: String) -> Result<Self, roxmltree::Error> {
        let options = roxmltree::ParsingOptions {
            allow_dtd: true,
            ..roxmltree::ParsingOptions::default()
        };
        let doc = roxmltree::Document::parse_with_options(&text, options)?;

        let mut elements = Vec::new();
        let root = convert(doc.root_element(), None, None, &mut elements);
        let line_index = LineIndex::new(&text);
        Ok(Self {
            id,
            path,
            text,
            line_index,
            elements,
            root,
            external_properties: HashMap::new(),
        })
    }

    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    /// The document root element.
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// The root element, when it actually is a `<project>`.
    pub fn project(&self) -> Option<ElementId> {
        (self.kind(self.root) == ElementKind::Project).then_some(self.root)
    }

    pub fn kind(&self, element: ElementId) -> ElementKind {
        self.elements[element.index()].kind
    }

    pub fn tag(&self, element: ElementId) -> &QName {
        &self.elements[element.index()].tag
    }

    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.elements[element.index()].parent
    }

    pub fn children(&self, element: ElementId) -> &[ElementId] {
        &self.elements[element.index()].children
    }

    pub fn attributes(&self, element: ElementId) -> &[Attribute] {
        &self.elements[element.index()].attributes
    }

    /// Raw attribute text, exactly as written.
    pub fn attribute(&self, element: ElementId, name: &str) -> Option<&str> {
        self.elements[element.index()]
            .attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Attribute lookup ignoring ASCII case, for the few camel-cased
    /// attributes Ant's introspection accepts in any casing
    /// (`prefixSeparator` and friends).
    pub fn attribute_ci(&self, element: ElementId, name: &str) -> Option<&str> {
        self.elements[element.index()]
            .attributes
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }

    pub fn range(&self, element: ElementId) -> TextRange {
        self.elements[element.index()].range
    }

    pub fn location(&self, element: ElementId) -> Location {
        Location::new(self.id, self.range(element))
    }

    pub fn handle(&self, element: ElementId) -> ElementHandle {
        ElementHandle {
            file: self.id,
            element,
        }
    }

    /// Namespaces in scope at `element`, as (prefix, uri) pairs.
    pub fn namespaces_in_scope(&self, element: ElementId) -> &[(Option<String>, String)] {
        &self.elements[element.index()].namespaces
    }

    /// Every element in document order.
    pub fn elements(&self) -> impl Iterator<Item = ElementId> + '_ {
        (0..self.elements.len() as u32).map(ElementId)
    }

    /// The nearest enclosing element of `kind`, starting from the parent.
    pub fn ancestor_of_kind(&self, element: ElementId, kind: ElementKind) -> Option<ElementId> {
        let mut cursor = self.parent(element);
        while let Some(el) = cursor {
            if self.kind(el) == kind {
                return Some(el);
            }
            cursor = self.parent(el);
        }
        None
    }

    /// Entries of the external file referenced by a `<property file=...>`,
    /// when the workspace loader could read it.
    pub fn external_properties(&self, element: ElementId) -> Option<&ExternalPropertyFile> {
        self.external_properties.get(&element)
    }
}

fn convert(
    node: roxmltree::Node<'_, '_>,
    parent: Option<ElementId>,
    parent_kind: Option<ElementKind>,
    elements: &mut Vec<ElementData>,
) -> ElementId {
    let tag = QName::new(
        node.tag_name().name(),
        node.tag_name().namespace().map(str::to_string),
    );
    let kind = classify(&tag, parent_kind);

    let namespaces: Vec<(Option<String>, String)> = node
        .namespaces()
        .map(|ns| (ns.name().map(str::to_string), ns.uri().to_string()))
        .collect();
    let namespaces: Arc<[(Option<String>, String)]> = match parent {
        // The in-scope set only changes on elements that declare namespaces;
        // share the parent's allocation otherwise.
        Some(p) if *elements[p.index()].namespaces == namespaces[..] => {
            Arc::clone(&elements[p.index()].namespaces)
        }
        _ => namespaces.into(),
    };

    let attributes = node
        .attributes()
        .map(|a| Attribute {
            name: a.name().to_string(),
            value: a.value().to_string(),
        })
        .collect();

    let range = node.range();
    let id = ElementId(elements.len() as u32);
    elements.push(ElementData {
        tag,
        kind,
        parent,
        children: Vec::new(),
        attributes,
        range: TextRange::new(
            TextSize::from(range.start as u32),
            TextSize::from(range.end as u32),
        ),
        namespaces,
    });

    for child in node.children().filter(roxmltree::Node::is_element) {
        let child_id = convert(child, Some(id), Some(kind), elements);
        elements[id.index()].children.push(child_id);
    }

    id
}

fn classify(tag: &QName, parent: Option<ElementKind>) -> ElementKind {
    // Custom-namespace tags are candidate custom elements, never built-ins.
    if tag.namespace.is_some() {
        return ElementKind::Other;
    }
    match tag.local.as_str() {
        "project" if parent.is_none() => ElementKind::Project,
        "target" | "extension-point" => ElementKind::Target,
        "import" => ElementKind::Import,
        "include" => ElementKind::Include,
        "property" | "loadproperties" => ElementKind::Property,
        "available" => ElementKind::Available,
        "condition" => ElementKind::Condition,
        "uptodate" => ElementKind::Uptodate,
        "tstamp" => ElementKind::Tstamp,
        "antcall" => ElementKind::AntCall,
        "param" if parent == Some(ElementKind::AntCall) => ElementKind::AntCallParam,
        "macrodef" => ElementKind::MacroDef,
        "attribute" if parent == Some(ElementKind::MacroDef) => ElementKind::MacroAttribute,
        "element" if parent == Some(ElementKind::MacroDef) => ElementKind::MacroElement,
        "element" if parent == Some(ElementKind::ScriptDef) => ElementKind::ScriptDefElement,
        "presetdef" => ElementKind::PresetDef,
        "scriptdef" => ElementKind::ScriptDef,
        "typedef" => ElementKind::TypeDef,
        "taskdef" => ElementKind::TaskDef,
        "path" | "classpath" => ElementKind::PathLike,
        "pathelement" => ElementKind::PathElement,
        "fileset" | "dirset" | "filelist" | "zipfileset" => ElementKind::FileSet,
        _ => ElementKind::Other,
    }
}
