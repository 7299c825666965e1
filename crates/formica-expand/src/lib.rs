//! `${name}` placeholder expansion against property providers.
//!
//! The expander is fed providers one at a time, in execution order, by a
//! caller that walks the project graph. Substituted values are themselves
//! expanded recursively against the providers seen so far, with a skip-set
//! preventing a property from being expanded inside its own value.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use formica_core::Location;

/// Capability of a build-file element (or synthetic source) that defines
/// named string values.
pub trait PropertiesProvider {
    /// Names this provider declares. A yielded name may still have no
    /// statically-known value (`<tstamp>` stamps, for example).
    fn property_names(&self) -> Vec<String>;

    /// Raw, unexpanded value for `name`. `None` unless `name` is one of
    /// [`property_names`](Self::property_names) and its value is known.
    fn property_value(&self, name: &str) -> Option<String>;

    /// Where `name` is declared, when the provider can point at a source.
    fn declaration_site(&self, name: &str) -> Option<Location> {
        let _ = name;
        None
    }

    /// Values from this provider are used verbatim; placeholders inside
    /// them are not expanded further.
    fn values_are_final(&self) -> bool {
        false
    }
}

/// Observes every placeholder the expander actually resolves, including
/// inside recursive sub-expansions. Callers use this to build memo caches.
pub trait ExpansionListener {
    fn property_resolved(&mut self, name: &str, value: &str);
}

/// A plain map-backed provider, used for caller-supplied user properties
/// and for fixtures.
#[derive(Debug, Clone, Default)]
pub struct StaticProperties {
    values: BTreeMap<String, String>,
    finals: bool,
}

impl StaticProperties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks every value as final: used verbatim, never re-expanded.
    #[must_use]
    pub fn with_final_values(mut self) -> Self {
        self.finals = true;
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }
}

impl FromIterator<(String, String)> for StaticProperties {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
            finals: false,
        }
    }
}

impl PropertiesProvider for StaticProperties {
    fn property_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    fn property_value(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn values_are_final(&self) -> bool {
        self.finals
    }
}

#[derive(Debug, Clone)]
struct Pending {
    name: String,
    /// Byte offset of the `${` in the working buffer.
    offset: usize,
}

/// Expands `${name}` placeholders in one string.
///
/// Placeholders do not nest: the first unescaped `${` up to the next `}`
/// is one placeholder. A literal `$` is written `$$`; the collapse happens
/// once, in [`into_result`](Self::into_result). Unresolved placeholders
/// are left verbatim.
pub struct PropertyExpander<'a> {
    buffer: String,
    /// Unresolved placeholders, ascending by offset.
    pending: Vec<Pending>,
    skip: BTreeSet<String>,
    providers: Vec<&'a dyn PropertiesProvider>,
    listener: Option<&'a mut dyn ExpansionListener>,
}

impl<'a> PropertyExpander<'a> {
    pub fn new(input: &str) -> Self {
        Self::with_skip(input, BTreeSet::new())
    }

    /// An expander that leaves placeholders named in `skip` verbatim.
    /// The skip names are the properties currently being expanded further
    /// up the call chain; shielding them breaks definition cycles.
    pub fn with_skip(input: &str, skip: BTreeSet<String>) -> Self {
        let pending = scan(input, &skip);
        Self {
            buffer: input.to_string(),
            pending,
            skip,
            providers: Vec::new(),
            listener: None,
        }
    }

    pub fn set_listener(&mut self, listener: &'a mut dyn ExpansionListener) {
        self.listener = Some(listener);
    }

    /// Whether the caller should keep supplying providers.
    #[must_use]
    pub fn has_placeholders(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_names(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(|p| p.name.as_str())
    }

    /// Offer one more provider, resolving whatever it can.
    ///
    /// Earlier providers keep priority: only placeholders they all declined
    /// are still pending here, and values substituted now are recursively
    /// expanded against every provider accepted so far (this one included).
    pub fn accept_provider(&mut self, provider: &'a dyn PropertiesProvider) {
        self.providers.push(provider);
        let mut idx = 0;
        while idx < self.pending.len() {
            let name = self.pending[idx].name.clone();
            let Some(value) = provider.property_value(&name) else {
                idx += 1;
                continue;
            };
            let offset = self.pending.remove(idx).offset;
            let placeholder_len = name.len() + 3;
            self.notify(&name, &value);

            let (expanded, inner) = if provider.values_are_final() {
                (value, Vec::new())
            } else {
                let mut deeper = self.skip.clone();
                deeper.insert(name);
                self.expand_with(&value, &deeper)
            };

            self.buffer
                .replace_range(offset..offset + placeholder_len, &expanded);
            let delta = expanded.len() as isize - placeholder_len as isize;
            for later in &mut self.pending[idx..] {
                later.offset = (later.offset as isize + delta) as usize;
            }

            // Leftovers from the substitution join the pending list at their
            // spliced positions; every accepted provider already declined
            // them, so scanning resumes after the insertion point.
            for leftover in inner {
                self.pending.insert(
                    idx,
                    Pending {
                        name: leftover.name,
                        offset: offset + leftover.offset,
                    },
                );
                idx += 1;
            }
        }
    }

    /// Best-effort result; collapses `$$` escapes.
    #[must_use]
    pub fn into_result(self) -> String {
        let mut out = String::with_capacity(self.buffer.len());
        let mut chars = self.buffer.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch == '$' && chars.peek() == Some(&'$') {
                chars.next();
            }
            out.push(ch);
        }
        out
    }

    /// Expand `input` against all accepted providers under `skip`.
    /// Returns the expanded text plus placeholders nobody resolved, at
    /// their offsets within the returned text.
    fn expand_with(&mut self, input: &str, skip: &BTreeSet<String>) -> (String, Vec<Pending>) {
        let mut out = String::with_capacity(input.len());
        let mut leftovers = Vec::new();
        let mut cursor = 0usize;

        for ph in scan(input, skip) {
            out.push_str(&input[cursor..ph.offset]);
            let spliced_at = out.len();
            let end = ph.offset + ph.name.len() + 3;
            cursor = end;

            let hit = self
                .providers
                .iter()
                .find_map(|p| p.property_value(&ph.name).map(|v| (*p, v)));
            match hit {
                Some((provider, value)) => {
                    self.notify(&ph.name, &value);
                    let (expanded, inner) = if provider.values_are_final() {
                        (value, Vec::new())
                    } else {
                        let mut deeper = skip.clone();
                        deeper.insert(ph.name.clone());
                        self.expand_with(&value, &deeper)
                    };
                    for mut leftover in inner {
                        leftover.offset += spliced_at;
                        leftovers.push(leftover);
                    }
                    out.push_str(&expanded);
                }
                None => {
                    leftovers.push(Pending {
                        name: ph.name,
                        offset: spliced_at,
                    });
                    out.push_str(&input[ph.offset..end]);
                }
            }
        }

        out.push_str(&input[cursor..]);
        (out, leftovers)
    }

    fn notify(&mut self, name: &str, value: &str) {
        if let Some(listener) = self.listener.as_mut() {
            listener.property_resolved(name, value);
        }
    }
}

fn scan(input: &str, skip: &BTreeSet<String>) -> Vec<Pending> {
    let bytes = input.as_bytes();
    let mut found = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        match bytes.get(i + 1) {
            // `$$` escape; collapsed later, in `into_result`.
            Some(b'$') => i += 2,
            Some(b'{') => {
                let Some(close) = input[i + 2..].find('}') else {
                    // Unterminated placeholder; the rest is literal text.
                    break;
                };
                let name = &input[i + 2..i + 2 + close];
                if !skip.contains(name) {
                    found.push(Pending {
                        name: name.to_string(),
                        offset: i,
                    });
                }
                i += close + 3;
            }
            _ => i += 1,
        }
    }
    found
}
