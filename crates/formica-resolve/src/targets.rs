//! Target resolution: mapping reference strings (`depends` entries,
//! `antcall` targets, the project default) to the target elements they
//! name.
//!
//! References written inside included files resolve through the
//! dependency edges the building stage records, because those carry the
//! include-prefix translation. Everything else is a direct lookup in the
//! completed effective-name map; forward references are fine, so the
//! walking stage is never entered.

use std::collections::BTreeMap;

use formica_core::{CancellationToken, Cancelled};
use formica_syntax::{ElementHandle, Workspace};

use crate::walker::{
    enclosing_target, DiscoveredTarget, ProjectWalker, Stage, TargetMap, WalkControl, WalkDelegate,
};

/// One resolved reference: the target element it lands on and the
/// effective name it is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub handle: ElementHandle,
    pub effective_name: String,
}

/// The outcome of resolving a batch of reference strings.
#[derive(Debug)]
pub struct TargetResolution {
    /// Request string to resolution, for the requests that matched.
    pub matched: BTreeMap<String, ResolvedTarget>,
    /// The complete effective-name map, for completion variants.
    pub targets: TargetMap,
}

struct TargetSearch {
    context: Option<ElementHandle>,
    /// Requests not yet matched to a dependency edge of the context.
    pending: Vec<String>,
    /// Request string to the effective name its edge points at.
    captured: BTreeMap<String, String>,
}

impl WalkDelegate for TargetSearch {
    fn target_discovered(&mut self, target: &DiscoveredTarget, depends: &[(String, String)]) {
        if self.context != Some(target.handle) {
            return;
        }
        let captured = &mut self.captured;
        self.pending.retain(|request| {
            match depends.iter().find(|(raw, _)| raw == request) {
                Some((_, effective)) => {
                    captured.insert(request.clone(), effective.clone());
                    false
                }
                None => true,
            }
        });
    }

    fn stage_completed(&mut self, _stage: Stage, _targets: &TargetMap) -> WalkControl {
        WalkControl::Stop
    }
}

/// Resolves each request string against the project graph. Requests that
/// match a dependency edge of the context's enclosing target go through
/// the edge's effective name; the rest are looked up by raw name.
pub fn resolve_targets(
    ws: &Workspace,
    requests: &[&str],
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<TargetResolution, Cancelled> {
    let mut search = TargetSearch {
        context: context.and_then(|handle| enclosing_target(ws, handle)),
        pending: requests.iter().map(|s| (*s).to_string()).collect(),
        captured: BTreeMap::new(),
    };
    // No context element is handed to the walk: a reference may name a
    // target declared after it, so registration must run to completion.
    let targets = ProjectWalker::new(ws, &mut search, token).run(None)?;

    let mut matched = BTreeMap::new();
    for request in requests {
        let through_edge = search
            .captured
            .get(*request)
            .and_then(|effective| targets.get(effective).map(|t| (effective.clone(), t)));
        let found =
            through_edge.or_else(|| targets.get(request).map(|t| ((*request).to_string(), t)));
        if let Some((effective_name, target)) = found {
            matched.insert(
                (*request).to_string(),
                ResolvedTarget {
                    handle: target.handle,
                    effective_name,
                },
            );
        }
    }
    tracing::trace!(
        requested = requests.len(),
        matched = matched.len(),
        "target references resolved"
    );
    Ok(TargetResolution { matched, targets })
}

/// Resolves a single reference string, read from `context` when given.
pub fn resolve_target(
    ws: &Workspace,
    reference: &str,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<Option<ResolvedTarget>, Cancelled> {
    let resolution = resolve_targets(ws, &[reference], context, token)?;
    Ok(resolution.matched.into_values().next())
}

/// The root project's `default` target, when declared and resolvable.
pub fn default_target(
    ws: &Workspace,
    token: &CancellationToken,
) -> Result<Option<ResolvedTarget>, Cancelled> {
    let file = ws.root_file();
    let Some(project) = file.project() else {
        return Ok(None);
    };
    let Some(name) = file.attribute(project, "default") else {
        return Ok(None);
    };
    resolve_target(ws, name, None, token)
}

/// Two same-project targets registered under one effective name; the
/// first keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateTarget {
    pub effective_name: String,
    pub first: ElementHandle,
    pub second: ElementHandle,
}

struct DuplicateCollector {
    findings: Vec<DuplicateTarget>,
}

impl WalkDelegate for DuplicateCollector {
    fn duplicate_target(
        &mut self,
        effective_name: &str,
        first: &DiscoveredTarget,
        second: &DiscoveredTarget,
    ) {
        self.findings.push(DuplicateTarget {
            effective_name: effective_name.to_string(),
            first: first.handle,
            second: second.handle,
        });
    }

    fn stage_completed(&mut self, _stage: Stage, _targets: &TargetMap) -> WalkControl {
        WalkControl::Stop
    }
}

/// Every duplicate-target finding across the whole graph, in discovery
/// order.
pub fn duplicate_targets(
    ws: &Workspace,
    token: &CancellationToken,
) -> Result<Vec<DuplicateTarget>, Cancelled> {
    let mut collector = DuplicateCollector {
        findings: Vec::new(),
    };
    ProjectWalker::new(ws, &mut collector, token).run(None)?;
    Ok(collector.findings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use formica_syntax::workspace::LoadOptions;
    use formica_syntax::MemoryFs;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn load(fs: &MemoryFs, root: &str) -> Workspace {
        Workspace::load(fs, Path::new(root), &LoadOptions::default()).expect("workspace loads")
    }

    fn target_named(ws: &Workspace, path: &str, name: &str) -> ElementHandle {
        let id = ws.file_id(Path::new(path)).expect("file loaded");
        let file = ws.build_file(id).expect("build file");
        for element in file.elements() {
            if file.tag(element).local == "target" && file.attribute(element, "name") == Some(name)
            {
                return file.handle(element);
            }
        }
        panic!("no <target name={name:?}> in {path}");
    }

    #[test]
    fn included_targets_resolve_only_under_their_prefix() {
        let fs = MemoryFs::new()
            .with_file(
                "/ws/build.xml",
                r#"<project name="root">
                     <include file="sub.xml" as="q"/>
                   </project>"#,
            )
            .with_file(
                "/ws/sub.xml",
                r#"<project name="sub">
                     <target name="X"/>
                   </project>"#,
            );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();

        let qualified = resolve_target(&ws, "q.X", None, &token).unwrap();
        assert_eq!(
            qualified,
            Some(ResolvedTarget {
                handle: target_named(&ws, "/ws/sub.xml", "X"),
                effective_name: "q.X".to_string(),
            })
        );
        assert_eq!(resolve_target(&ws, "X", None, &token).unwrap(), None);
    }

    #[test]
    fn imported_targets_keep_free_names_and_yield_taken_ones() {
        let fs = MemoryFs::new()
            .with_file(
                "/ws/build.xml",
                r#"<project name="root">
                     <target name="deploy"/>
                     <import file="common.xml"/>
                   </project>"#,
            )
            .with_file(
                "/ws/common.xml",
                r#"<project name="common">
                     <target name="compile"/>
                     <target name="deploy"/>
                   </project>"#,
            );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();

        // The free name goes to the imported target.
        let compile = resolve_target(&ws, "compile", None, &token).unwrap().unwrap();
        assert_eq!(compile.handle, target_named(&ws, "/ws/common.xml", "compile"));

        // The taken name stays with the first registration; the alias still
        // reaches the imported one.
        let deploy = resolve_target(&ws, "deploy", None, &token).unwrap().unwrap();
        assert_eq!(deploy.handle, target_named(&ws, "/ws/build.xml", "deploy"));
        let aliased = resolve_target(&ws, "common.deploy", None, &token).unwrap().unwrap();
        assert_eq!(aliased.handle, target_named(&ws, "/ws/common.xml", "deploy"));
    }

    #[test]
    fn references_inside_included_files_resolve_through_edges() {
        let fs = MemoryFs::new()
            .with_file(
                "/ws/build.xml",
                r#"<project name="root">
                     <include file="sub.xml" as="q"/>
                   </project>"#,
            )
            .with_file(
                "/ws/sub.xml",
                r#"<project name="sub">
                     <target name="setup"/>
                     <target name="run" depends="setup"/>
                   </project>"#,
            );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();
        let run = target_named(&ws, "/ws/sub.xml", "run");

        // Written as "setup" inside sub.xml, the reference means "q.setup".
        let resolution = resolve_targets(&ws, &["setup"], Some(run), &token).unwrap();
        let resolved = resolution.matched.get("setup").expect("reference resolves");
        assert_eq!(resolved.handle, target_named(&ws, "/ws/sub.xml", "setup"));
        assert_eq!(resolved.effective_name, "q.setup");

        // Without the context edge there is no bare "setup".
        assert_eq!(resolve_target(&ws, "setup", None, &token).unwrap(), None);
    }

    #[test]
    fn unmatched_requests_fall_back_to_raw_lookup() {
        let fs = MemoryFs::new().with_file(
            "/ws/build.xml",
            r#"<project name="root">
                 <target name="clean"/>
                 <target name="dist" depends="clean"/>
                 <target name="report"/>
               </project>"#,
        );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();
        let dist = target_named(&ws, "/ws/build.xml", "dist");

        let resolution =
            resolve_targets(&ws, &["clean", "report", "missing"], Some(dist), &token).unwrap();
        assert_eq!(
            resolution.matched.get("clean").map(|t| t.handle),
            Some(target_named(&ws, "/ws/build.xml", "clean"))
        );
        // Not a dependency of `dist`, found by name directly.
        assert_eq!(
            resolution.matched.get("report").map(|t| t.handle),
            Some(target_named(&ws, "/ws/build.xml", "report"))
        );
        assert!(!resolution.matched.contains_key("missing"));
        assert_eq!(resolution.targets.len(), 3);
    }

    #[test]
    fn duplicate_targets_report_every_redefinition() {
        let fs = MemoryFs::new().with_file(
            "/ws/build.xml",
            r#"<project name="root">
                 <target name="build"/>
                 <target name="build"/>
                 <target name="build"/>
                 <target name="other"/>
               </project>"#,
        );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();

        let findings = duplicate_targets(&ws, &token).unwrap();
        assert_eq!(findings.len(), 2);
        let first = target_named(&ws, "/ws/build.xml", "build");
        for finding in &findings {
            assert_eq!(finding.effective_name, "build");
            assert_eq!(finding.first, first);
            assert_ne!(finding.second, first);
        }
    }

    #[test]
    fn import_collisions_are_not_duplicates() {
        let fs = MemoryFs::new()
            .with_file(
                "/ws/build.xml",
                r#"<project name="root">
                     <target name="deploy"/>
                     <import file="common.xml"/>
                   </project>"#,
            )
            .with_file(
                "/ws/common.xml",
                r#"<project name="common">
                     <target name="deploy"/>
                   </project>"#,
            );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();

        assert_eq!(duplicate_targets(&ws, &token).unwrap(), vec![]);
    }

    #[test]
    fn default_target_resolves_through_the_map() {
        let fs = MemoryFs::new().with_file(
            "/ws/build.xml",
            r#"<project name="root" default="dist">
                 <target name="dist"/>
               </project>"#,
        );
        let ws = load(&fs, "/ws/build.xml");
        let token = CancellationToken::new();

        let target = default_target(&ws, &token).unwrap().unwrap();
        assert_eq!(target.handle, target_named(&ws, "/ws/build.xml", "dist"));
        assert_eq!(target.effective_name, "dist");

        let fs = MemoryFs::new().with_file("/ws/build.xml", r#"<project name="root"/>"#);
        let ws = load(&fs, "/ws/build.xml");
        assert_eq!(default_target(&ws, &token).unwrap(), None);
    }
}
