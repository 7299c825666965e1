//! Typed read-only views over classified elements.
//!
//! A view is a thin `(file, element)` pair whose `cast` checks the element
//! kind. Views expose raw attribute text; property expansion happens in the
//! resolution layer, not here.

use crate::document::{BuildFile, ElementHandle, ElementId, ElementKind};

/// `true`/`yes`/`on`, the way Ant reads boolean attributes.
fn is_true(value: &str) -> bool {
    matches!(value, "true" | "yes" | "on")
}

macro_rules! view {
    ($name:ident) => {
        #[derive(Clone, Copy)]
        pub struct $name<'a> {
            file: &'a BuildFile,
            element: ElementId,
        }

        impl<'a> $name<'a> {
            #[inline]
            pub fn element(&self) -> ElementId {
                self.element
            }

            #[inline]
            pub fn handle(&self) -> ElementHandle {
                self.file.handle(self.element)
            }

            fn attr(&self, name: &str) -> Option<&'a str> {
                self.file.attribute(self.element, name)
            }
        }
    };
}

macro_rules! attr_ci {
    ($name:ident) => {
        impl<'a> $name<'a> {
            fn attr_ci(&self, name: &str) -> Option<&'a str> {
                self.file.attribute_ci(self.element, name)
            }
        }
    };
}

view!(ProjectView);

impl<'a> ProjectView<'a> {
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        (file.kind(element) == ElementKind::Project).then_some(Self { file, element })
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    pub fn default_target(&self) -> Option<&'a str> {
        self.attr("default")
    }

    pub fn basedir(&self) -> Option<&'a str> {
        self.attr("basedir")
    }
}

view!(TargetView);

impl<'a> TargetView<'a> {
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        (file.kind(element) == ElementKind::Target).then_some(Self { file, element })
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    /// The raw depends list, split on commas with surrounding whitespace
    /// dropped. Empty segments disappear, so `"a,,b"` yields two entries.
    pub fn depends(&self) -> Vec<&'a str> {
        self.attr("depends")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|dep| !dep.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<&'a str> {
        self.attr("description")
    }
}

view!(ImportView);
attr_ci!(ImportView);

impl<'a> ImportView<'a> {
    /// Covers both `<import>` and `<include>`, which share a schema and
    /// differ only in aliasing semantics.
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        matches!(
            file.kind(element),
            ElementKind::Import | ElementKind::Include
        )
        .then_some(Self { file, element })
    }

    pub fn is_include(&self) -> bool {
        self.file.kind(self.element) == ElementKind::Include
    }

    pub fn file_attr(&self) -> Option<&'a str> {
        self.attr("file")
    }

    /// The `as` prefix. When absent the referenced project's own name
    /// serves as the prefix; that fallback is the caller's job since it
    /// needs the other file.
    pub fn prefix(&self) -> Option<&'a str> {
        self.attr("as")
    }

    pub fn prefix_separator(&self) -> &'a str {
        self.attr_ci("prefixseparator").unwrap_or(".")
    }

    pub fn optional(&self) -> bool {
        self.attr("optional").is_some_and(is_true)
    }
}

view!(PropertyView);
attr_ci!(PropertyView);

impl<'a> PropertyView<'a> {
    /// Covers `<property>` and `<loadproperties>`.
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        (file.kind(element) == ElementKind::Property).then_some(Self { file, element })
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    /// `value`, or failing that `location`, which Ant also treats as a
    /// value-defining attribute.
    pub fn value(&self) -> Option<&'a str> {
        self.attr("value").or_else(|| self.attr("location"))
    }

    /// `file` on `<property>`, `srcFile` on `<loadproperties>`.
    pub fn file_attr(&self) -> Option<&'a str> {
        self.attr("file").or_else(|| self.attr_ci("srcfile"))
    }

    /// Prefix applied to every key loaded from `file`.
    pub fn prefix(&self) -> Option<&'a str> {
        self.attr("prefix")
    }

    pub fn environment(&self) -> Option<&'a str> {
        self.attr("environment")
    }
}

view!(MacroDefView);

impl<'a> MacroDefView<'a> {
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        (file.kind(element) == ElementKind::MacroDef).then_some(Self { file, element })
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    pub fn uri(&self) -> Option<&'a str> {
        self.attr("uri")
    }

    /// Names of nested `<attribute>` declarations.
    pub fn attribute_names(&self) -> Vec<&'a str> {
        self.named_children(ElementKind::MacroAttribute)
            .map(|(_, name)| name)
            .collect()
    }

    /// Nested `<element>` declarations as `(element, name)` pairs.
    pub fn elements(&self) -> Vec<(ElementId, &'a str)> {
        self.named_children(ElementKind::MacroElement).collect()
    }

    fn named_children(
        &self,
        kind: ElementKind,
    ) -> impl Iterator<Item = (ElementId, &'a str)> + '_ {
        let file = self.file;
        file.children(self.element)
            .iter()
            .filter(move |&&child| file.kind(child) == kind)
            .filter_map(move |&child| file.attribute(child, "name").map(|name| (child, name)))
    }
}

view!(ScriptDefView);

/// One nested `<element>` of a `<scriptdef>`.
pub struct ScriptElement<'a> {
    pub element: ElementId,
    pub name: &'a str,
    pub classname: Option<&'a str>,
    pub type_name: Option<&'a str>,
}

impl<'a> ScriptDefView<'a> {
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        (file.kind(element) == ElementKind::ScriptDef).then_some(Self { file, element })
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    pub fn uri(&self) -> Option<&'a str> {
        self.attr("uri")
    }

    pub fn elements(&self) -> Vec<ScriptElement<'a>> {
        let file = self.file;
        file.children(self.element)
            .iter()
            .filter(|&&child| file.kind(child) == ElementKind::ScriptDefElement)
            .filter_map(|&child| {
                let name = file.attribute(child, "name")?;
                Some(ScriptElement {
                    element: child,
                    name,
                    classname: file.attribute(child, "classname"),
                    type_name: file.attribute(child, "type"),
                })
            })
            .collect()
    }
}

view!(TypeDefView);
attr_ci!(TypeDefView);

impl<'a> TypeDefView<'a> {
    /// Covers `<typedef>` and `<taskdef>`.
    pub fn cast(file: &'a BuildFile, element: ElementId) -> Option<Self> {
        matches!(
            file.kind(element),
            ElementKind::TypeDef | ElementKind::TaskDef
        )
        .then_some(Self { file, element })
    }

    pub fn is_task(&self) -> bool {
        self.file.kind(self.element) == ElementKind::TaskDef
    }

    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
    }

    pub fn classname(&self) -> Option<&'a str> {
        self.attr("classname")
    }

    pub fn resource(&self) -> Option<&'a str> {
        self.attr("resource")
    }

    pub fn file_attr(&self) -> Option<&'a str> {
        self.attr("file")
    }

    pub fn uri(&self) -> Option<&'a str> {
        self.attr("uri")
    }

    pub fn classpath(&self) -> Option<&'a str> {
        self.attr("classpath")
    }

    pub fn classpath_ref(&self) -> Option<&'a str> {
        self.attr_ci("classpathref")
    }

    pub fn loader_ref(&self) -> Option<&'a str> {
        self.attr_ci("loaderref")
    }
}
