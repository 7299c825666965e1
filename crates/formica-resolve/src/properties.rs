//! Property resolution: which element defines a name at a given point of
//! the build, what the name expands to, and which names are in scope.
//!
//! Ant properties are immutable once set, so the first provider the walk
//! reaches that declares the queried name wins; everything after it, in
//! execution order, is irrelevant. Command-line definitions sit in front
//! of every build-file provider and their values are final.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use formica_core::{CancellationToken, Cancelled, Location};
use formica_expand::{ExpansionListener, PropertiesProvider, PropertyExpander};
use formica_syntax::{provider_for, ElementHandle, ElementProperties, Workspace};

use crate::walker::{ProjectWalker, WalkControl, WalkDelegate};

/// The answer to "who defines `name` here".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyLookup {
    /// The winning provider element, when any build-file element declares
    /// the name before the query point.
    pub provider: Option<ElementHandle>,
    /// Where the winning declaration lives. Points into the property file
    /// itself when the winner loads one.
    pub declaration: Option<Location>,
    /// Every name any provider in scope declares, user definitions
    /// included.
    pub variants: BTreeSet<String>,
}

struct PropertySearch<'a> {
    /// `None` turns the search into a pure variants sweep.
    name: Option<&'a str>,
    provider: Option<ElementHandle>,
    declaration: Option<Location>,
    variants: BTreeSet<String>,
}

impl<'a> PropertySearch<'a> {
    fn new(ws: &Workspace, name: Option<&'a str>) -> Self {
        Self {
            name,
            provider: None,
            declaration: None,
            variants: ws.user_properties().values().keys().cloned().collect(),
        }
    }
}

impl WalkDelegate for PropertySearch<'_> {
    fn provider_found(&mut self, provider: ElementProperties<'_>) -> WalkControl {
        // Call parameters belong to the call site, not to the surrounding
        // scope; matching them here would claim names the called target
        // never sees.
        if provider.is_call_param() {
            return WalkControl::Continue;
        }
        let names = provider.property_names();
        self.variants.extend(names.iter().cloned());
        if let Some(name) = self.name {
            if names.iter().any(|declared| declared == name) {
                self.provider = Some(provider.handle());
                self.declaration = provider.declaration_site(name);
                return WalkControl::Stop;
            }
        }
        WalkControl::Continue
    }
}

/// Finds the first provider in execution order, up to `context`, that
/// declares `name`.
pub fn resolve_property(
    ws: &Workspace,
    name: &str,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<PropertyLookup, Cancelled> {
    let mut search = PropertySearch::new(ws, Some(name));
    ProjectWalker::new(ws, &mut search, token).run(context)?;
    tracing::trace!(
        name,
        found = search.provider.is_some(),
        "property lookup finished"
    );
    Ok(PropertyLookup {
        provider: search.provider,
        declaration: search.declaration,
        variants: search.variants,
    })
}

/// Every property name visible at `context` (or anywhere, without one).
pub fn property_variants(
    ws: &Workspace,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<BTreeSet<String>, Cancelled> {
    let mut search = PropertySearch::new(ws, None);
    ProjectWalker::new(ws, &mut search, token).run(context)?;
    Ok(search.variants)
}

struct ProviderCollector {
    providers: Vec<ElementHandle>,
}

impl WalkDelegate for ProviderCollector {
    fn provider_found(&mut self, provider: ElementProperties<'_>) -> WalkControl {
        if !provider.is_call_param() {
            self.providers.push(provider.handle());
        }
        WalkControl::Continue
    }
}

/// Every provider element visible at `context`, in the order a build
/// would execute them. This is the provider feed for placeholder
/// expansion.
pub fn providers_in_scope(
    ws: &Workspace,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<Vec<ElementHandle>, Cancelled> {
    let mut collector = ProviderCollector {
        providers: Vec::new(),
    };
    ProjectWalker::new(ws, &mut collector, token).run(context)?;
    Ok(collector.providers)
}

/// The value `name` carries at `context`: the command-line definition
/// verbatim when one exists, otherwise the winning declaration's raw
/// value with its own placeholders expanded as of the declaration site.
pub fn property_value(
    ws: &Workspace,
    name: &str,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<Option<String>, Cancelled> {
    if let Some(value) = ws.user_properties().values().get(name) {
        return Ok(Some(value.clone()));
    }
    let lookup = resolve_property(ws, name, context, token)?;
    let Some(winner) = lookup.provider else {
        return Ok(None);
    };
    let Some(file) = ws.build_file(winner.file) else {
        return Ok(None);
    };
    let Some(provider) = provider_for(file, winner.element) else {
        return Ok(None);
    };
    let Some(raw) = provider.property_value(name) else {
        return Ok(None);
    };
    // A property's value is fixed the moment it is set, so placeholders
    // inside it see the providers that ran before the declaration, not
    // the ones in force at the query point.
    let order = providers_in_scope(ws, Some(winner), token)?;
    let skip = BTreeSet::from([name.to_string()]);
    Ok(Some(expand_with_order(ws, &raw, skip, &order, None)))
}

/// Expands `${name}` placeholders in `input` as they would read at
/// `context`. Unresolved placeholders stay verbatim; `$$` collapses.
pub fn expand_string(
    ws: &Workspace,
    input: &str,
    context: Option<ElementHandle>,
    token: &CancellationToken,
) -> Result<String, Cancelled> {
    let probe = PropertyExpander::new(input);
    if !probe.has_placeholders() {
        return Ok(probe.into_result());
    }
    let order = providers_in_scope(ws, context, token)?;
    Ok(expand_with_order(ws, input, BTreeSet::new(), &order, None))
}

/// Like [`expand_string`], recording every placeholder the expansion
/// resolves into `memo` under `element`.
pub fn expand_for_element(
    ws: &Workspace,
    element: ElementHandle,
    input: &str,
    memo: &mut PropertyMemo,
    token: &CancellationToken,
) -> Result<String, Cancelled> {
    let probe = PropertyExpander::new(input);
    if !probe.has_placeholders() {
        return Ok(probe.into_result());
    }
    let order = providers_in_scope(ws, Some(element), token)?;
    let mut listener = MemoListener { memo, element };
    Ok(expand_with_order(
        ws,
        input,
        BTreeSet::new(),
        &order,
        Some(&mut listener),
    ))
}

/// Drives one expander over the user properties and the walk-ordered
/// element providers. `order` is materialized into provider values first
/// so their borrows outlive the expander.
fn expand_with_order(
    ws: &Workspace,
    input: &str,
    skip: BTreeSet<String>,
    order: &[ElementHandle],
    listener: Option<&mut dyn ExpansionListener>,
) -> String {
    let providers: Vec<ElementProperties<'_>> = order
        .iter()
        .filter_map(|handle| {
            let file = ws.build_file(handle.file)?;
            provider_for(file, handle.element)
        })
        .collect();

    let mut expander = PropertyExpander::with_skip(input, skip);
    if let Some(listener) = listener {
        expander.set_listener(listener);
    }
    expander.accept_provider(ws.user_properties());
    for provider in &providers {
        if !expander.has_placeholders() {
            break;
        }
        expander.accept_provider(provider);
    }
    expander.into_result()
}

/// Values resolved while expanding at a given element, kept across calls
/// of one resolution session. The first resolution of a name at an
/// element sticks, matching the first-definition-wins rule the expander
/// itself follows.
#[derive(Debug, Default)]
pub struct PropertyMemo {
    by_element: HashMap<ElementHandle, BTreeMap<String, String>>,
}

impl PropertyMemo {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized value of `name` at `element`, when an expansion there
    /// has resolved it.
    pub fn get(&self, element: ElementHandle, name: &str) -> Option<&str> {
        self.by_element.get(&element)?.get(name).map(String::as_str)
    }

    /// Names memoized at `element`, in name order.
    pub fn names_at(&self, element: ElementHandle) -> impl Iterator<Item = &str> {
        self.by_element
            .get(&element)
            .into_iter()
            .flat_map(|values| values.keys().map(String::as_str))
    }
}

struct MemoListener<'a> {
    memo: &'a mut PropertyMemo,
    element: ElementHandle,
}

impl ExpansionListener for MemoListener<'_> {
    fn property_resolved(&mut self, name: &str, value: &str) {
        self.memo
            .by_element
            .entry(self.element)
            .or_default()
            .entry(name.to_string())
            .or_insert_with(|| value.to_string());
    }
}
