//! Capability table merged from every loaded plugin.

use std::collections::BTreeMap;

use super::proto::{CatalogueEntry, EntryType};

/// Kind of capability a plugin advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityKind {
    /// Compares contents of a content type
    ContentMatcher,
    /// Generates contents of a content type
    ContentGenerator,
    /// Serves a transport
    Transport,
    /// Provides a matching rule
    Matcher,
    /// Provides an interaction kind
    Interaction,
}

impl From<EntryType> for CapabilityKind {
    fn from(entry_type: EntryType) -> Self {
        match entry_type {
            EntryType::ContentMatcher => Self::ContentMatcher,
            EntryType::ContentGenerator => Self::ContentGenerator,
            EntryType::Transport => Self::Transport,
            EntryType::Matcher => Self::Matcher,
            EntryType::Interaction => Self::Interaction,
        }
    }
}

/// One advertised capability and its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// Capability kind
    pub kind: CapabilityKind,
    /// Capability key
    pub key: String,
    /// Capability attributes
    pub values: BTreeMap<String, String>,
    /// Owning plugin
    pub plugin: String,
}

impl Capability {
    /// Convert a wire entry advertised by `plugin`.
    #[must_use]
    pub fn from_entry(plugin: &str, entry: &CatalogueEntry) -> Self {
        Self {
            kind: entry.r#type().into(),
            key: entry.key.clone(),
            values: entry.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            plugin: plugin.to_string(),
        }
    }

    /// Content types listed in the `content-types` attribute.
    pub fn content_types(&self) -> impl Iterator<Item = &str> {
        self.values
            .get("content-types")
            .map(String::as_str)
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
    }

    /// Whether this capability handles `content_type`, ignoring parameters.
    #[must_use]
    pub fn handles(&self, content_type: &str) -> bool {
        let base = content_type.split(';').next().unwrap_or_default().trim();
        self.content_types().any(|ct| ct.eq_ignore_ascii_case(base))
    }
}

/// Capabilities keyed by kind and key. A later registration of the same
/// key replaces the earlier one.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    entries: BTreeMap<(CapabilityKind, String), Capability>,
}

impl Catalogue {
    /// Empty catalogue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge capabilities.
    pub fn merge(&mut self, capabilities: impl IntoIterator<Item = Capability>) {
        for capability in capabilities {
            self.entries
                .insert((capability.kind, capability.key.clone()), capability);
        }
    }

    /// Drop every capability owned by `plugin`.
    pub fn remove_plugin(&mut self, plugin: &str) {
        self.entries.retain(|_, capability| capability.plugin != plugin);
    }

    /// Transport named `name`.
    #[must_use]
    pub fn transport(&self, name: &str) -> Option<&Capability> {
        self.entries
            .get(&(CapabilityKind::Transport, name.to_string()))
    }

    /// Content matcher handling `content_type`.
    #[must_use]
    pub fn content_matcher(&self, content_type: &str) -> Option<&Capability> {
        self.by_kind(CapabilityKind::ContentMatcher)
            .find(|capability| capability.handles(content_type))
    }

    /// Content generator handling `content_type`.
    #[must_use]
    pub fn content_generator(&self, content_type: &str) -> Option<&Capability> {
        self.by_kind(CapabilityKind::ContentGenerator)
            .find(|capability| capability.handles(content_type))
    }

    /// Capabilities of one kind.
    pub fn by_kind(&self, kind: CapabilityKind) -> impl Iterator<Item = &Capability> {
        self.entries
            .values()
            .filter(move |capability| capability.kind == kind)
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the catalogue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(kind: EntryType, key: &str, content_types: Option<&str>) -> CatalogueEntry {
        let mut values = HashMap::new();
        if let Some(ct) = content_types {
            values.insert("content-types".to_string(), ct.to_string());
        }
        CatalogueEntry {
            r#type: kind as i32,
            key: key.to_string(),
            values,
        }
    }

    #[test]
    fn test_merge_and_lookup() {
        let mut catalogue = Catalogue::new();
        catalogue.merge([
            Capability::from_entry(
                "protobuf",
                &entry(
                    EntryType::ContentMatcher,
                    "protobuf",
                    Some("application/protobuf;application/grpc"),
                ),
            ),
            Capability::from_entry("protobuf", &entry(EntryType::Transport, "grpc", None)),
        ]);

        assert_eq!(catalogue.len(), 2);
        assert!(catalogue.transport("grpc").is_some());
        assert!(catalogue.transport("http").is_none());
        assert_eq!(
            catalogue
                .content_matcher("application/grpc; charset=utf-8")
                .map(|c| c.plugin.as_str()),
            Some("protobuf")
        );
        assert!(catalogue.content_generator("application/protobuf").is_none());
    }

    #[test]
    fn test_remove_plugin() {
        let mut catalogue = Catalogue::new();
        catalogue.merge([
            Capability::from_entry("protobuf", &entry(EntryType::Transport, "grpc", None)),
            Capability::from_entry(
                "csv",
                &entry(EntryType::ContentMatcher, "csv", Some("text/csv")),
            ),
        ]);
        catalogue.remove_plugin("protobuf");

        assert!(catalogue.transport("grpc").is_none());
        assert!(catalogue.content_matcher("text/csv").is_some());
    }
}
