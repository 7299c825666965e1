//! [`PropertiesProvider`] backing for property-defining elements.
//!
//! The resolution walkers talk to elements exclusively through this
//! adapter, so the rules for which elements define which names live here:
//!
//! * `<project>`: `basedir`, `ant.file`, and `ant.project.name` when named.
//! * `<property>`/`<loadproperties>`: the `name`/`value` pair, or every key
//!   of the referenced file when the workspace loader could read it.
//! * `<available>`, `<condition>`, `<uptodate>`: the `property` attribute,
//!   with the declared `value` or Ant's implicit `"true"`.
//! * `<tstamp>`: `DSTAMP`/`TSTAMP`/`TODAY` as declared-but-unknown names.
//! * `<param>` under `<antcall>`: the call parameter, matched separately by
//!   the property resolver.

use formica_core::Location;
use formica_expand::PropertiesProvider;

use crate::document::{BuildFile, ElementHandle, ElementId, ElementKind};
use crate::views::PropertyView;

const TSTAMP_NAMES: [&str; 3] = ["DSTAMP", "TSTAMP", "TODAY"];

/// A property-defining element, ready to answer provider queries.
#[derive(Clone, Copy)]
pub struct ElementProperties<'a> {
    file: &'a BuildFile,
    element: ElementId,
}

/// The provider view of `element`, when its kind can define properties.
pub fn provider_for(file: &BuildFile, element: ElementId) -> Option<ElementProperties<'_>> {
    matches!(
        file.kind(element),
        ElementKind::Project
            | ElementKind::Property
            | ElementKind::Available
            | ElementKind::Condition
            | ElementKind::Uptodate
            | ElementKind::Tstamp
            | ElementKind::AntCallParam
    )
    .then_some(ElementProperties { file, element })
}

impl<'a> ElementProperties<'a> {
    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn handle(&self) -> ElementHandle {
        self.file.handle(self.element)
    }

    /// True for `<param>` under `<antcall>`, which the property resolver
    /// skips in favor of call-site matching.
    pub fn is_call_param(&self) -> bool {
        self.file.kind(self.element) == ElementKind::AntCallParam
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        self.file.attribute(self.element, name)
    }

    /// The `prefix` of a file-backed `<property>`, normalized to end in
    /// a dot the way Ant applies it.
    fn file_prefix(&self) -> Option<String> {
        let view = PropertyView::cast(self.file, self.element)?;
        view.file_attr()?;
        let prefix = view.prefix()?;
        Some(if prefix.ends_with('.') {
            prefix.to_string()
        } else {
            format!("{prefix}.")
        })
    }
}

impl PropertiesProvider for ElementProperties<'_> {
    fn property_names(&self) -> Vec<String> {
        match self.file.kind(self.element) {
            ElementKind::Project => {
                let mut names = vec!["basedir".to_string(), "ant.file".to_string()];
                if self.attr("name").is_some() {
                    names.push("ant.project.name".to_string());
                }
                names
            }
            ElementKind::Property => {
                if let Some(name) = self.attr("name") {
                    return vec![name.to_string()];
                }
                if let Some(external) = self.file.external_properties(self.element) {
                    let prefix = self.file_prefix();
                    return external
                        .entries
                        .keys()
                        .map(|key| match &prefix {
                            Some(prefix) => format!("{prefix}{key}"),
                            None => key.to_string(),
                        })
                        .collect();
                }
                Vec::new()
            }
            ElementKind::Available | ElementKind::Condition | ElementKind::Uptodate => self
                .attr("property")
                .map(str::to_string)
                .into_iter()
                .collect(),
            ElementKind::Tstamp => TSTAMP_NAMES.iter().map(|s| (*s).to_string()).collect(),
            ElementKind::AntCallParam => {
                self.attr("name").map(str::to_string).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    fn property_value(&self, name: &str) -> Option<String> {
        match self.file.kind(self.element) {
            ElementKind::Project => match name {
                "basedir" => Some(self.attr("basedir").unwrap_or(".").to_string()),
                "ant.file" => Some(self.file.path().to_string_lossy().into_owned()),
                "ant.project.name" => self.attr("name").map(str::to_string),
                _ => None,
            },
            ElementKind::Property => {
                let view = PropertyView::cast(self.file, self.element)?;
                if let Some(declared) = view.name() {
                    return (declared == name)
                        .then(|| view.value())
                        .flatten()
                        .map(str::to_string);
                }
                let external = self.file.external_properties(self.element)?;
                let stripped = match self.file_prefix() {
                    Some(prefix) => name.strip_prefix(&prefix)?,
                    None => name,
                };
                external.entries.get(stripped).map(|entry| entry.value.clone())
            }
            ElementKind::Available | ElementKind::Condition | ElementKind::Uptodate => {
                (self.attr("property") == Some(name))
                    .then(|| self.attr("value").unwrap_or("true").to_string())
            }
            // Timestamp values exist only at run time.
            ElementKind::Tstamp => None,
            ElementKind::AntCallParam => (self.attr("name") == Some(name))
                .then(|| self.attr("value"))
                .flatten()
                .map(str::to_string),
            _ => None,
        }
    }

    fn declaration_site(&self, name: &str) -> Option<Location> {
        if self.file.kind(self.element) == ElementKind::Property {
            if let Some(external) = self.file.external_properties(self.element) {
                let stripped = match self.file_prefix() {
                    Some(prefix) => name.strip_prefix(&prefix)?,
                    None => name,
                };
                if let Some(entry) = external.entries.get(stripped) {
                    return Some(Location::new(external.file, entry.key_range));
                }
            }
        }
        self.property_names()
            .iter()
            .any(|declared| declared == name)
            .then(|| self.file.location(self.element))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formica_core::FileId;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn parse(text: &str) -> BuildFile {
        BuildFile::parse(FileId::from_raw(0), PathBuf::from("/ws/build.xml"), text.to_string())
            .unwrap()
    }

    fn names(provider: &ElementProperties<'_>) -> Vec<String> {
        let mut names = provider.property_names();
        names.sort();
        names
    }

    #[test]
    fn project_declares_its_intrinsic_names() {
        let file = parse(r#"<project name="app" basedir="sub"/>"#);
        let provider = provider_for(&file, file.root()).unwrap();
        assert_eq!(
            names(&provider),
            vec!["ant.file", "ant.project.name", "basedir"]
        );
        assert_eq!(provider.property_value("basedir"), Some("sub".to_string()));
        assert_eq!(
            provider.property_value("ant.project.name"),
            Some("app".to_string())
        );
        assert_eq!(
            provider.property_value("ant.file"),
            Some("/ws/build.xml".to_string())
        );

        let anonymous = parse("<project/>");
        let provider = provider_for(&anonymous, anonymous.root()).unwrap();
        assert_eq!(names(&provider), vec!["ant.file", "basedir"]);
        assert_eq!(provider.property_value("basedir"), Some(".".to_string()));
        assert_eq!(provider.property_value("ant.project.name"), None);
    }

    #[test]
    fn condition_values_default_to_true() {
        let file = parse(
            r#"<project>
                <available property="has.lib" file="lib.jar"/>
                <condition property="on.ci" value="yes"><os family="unix"/></condition>
            </project>"#,
        );
        let children = file.children(file.root()).to_vec();
        let available = provider_for(&file, children[0]).unwrap();
        assert_eq!(available.property_value("has.lib"), Some("true".to_string()));
        assert_eq!(available.property_value("other"), None);

        let condition = provider_for(&file, children[1]).unwrap();
        assert_eq!(condition.property_value("on.ci"), Some("yes".to_string()));
    }

    #[test]
    fn tstamp_names_have_no_static_value() {
        let file = parse(r#"<project><tstamp/></project>"#);
        let provider = provider_for(&file, file.children(file.root())[0]).unwrap();
        assert_eq!(names(&provider), vec!["DSTAMP", "TODAY", "TSTAMP"]);
        assert_eq!(provider.property_value("DSTAMP"), None);
        assert!(provider.declaration_site("TSTAMP").is_some());
        assert!(provider.declaration_site("nope").is_none());
    }

    #[test]
    fn call_params_are_flagged_for_the_resolver() {
        let file = parse(
            r#"<project>
                <target name="t">
                    <antcall target="u"><param name="p" value="v"/></antcall>
                </target>
            </project>"#,
        );
        let target = file.children(file.root())[0];
        let antcall = file.children(target)[0];
        let param = file.children(antcall)[0];
        let provider = provider_for(&file, param).unwrap();
        assert!(provider.is_call_param());
        assert_eq!(provider.property_value("p"), Some("v".to_string()));
        assert!(provider_for(&file, antcall).is_none());
    }

    #[test]
    fn plain_elements_are_not_providers() {
        let file = parse(r#"<project><echo message="hi"/></project>"#);
        assert!(provider_for(&file, file.children(file.root())[0]).is_none());
    }
}
