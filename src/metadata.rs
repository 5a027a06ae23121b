//! Metadata storage for vector annotations.
//!
//! String-keyed, string-valued metadata attached per node, stored
//! slot-parallel with the vector store. An absent entry means empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::store::NodeId;

/// Key-value metadata for a single vector.
pub type Metadata = HashMap<String, String>;

/// Slot-parallel storage of per-node metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetadataStore {
    entries: Vec<Metadata>,
}

impl MetadataStore {
    /// Creates a new, empty metadata store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Rebuilds a store from recovered slots.
    #[must_use]
    pub(crate) fn from_slots(entries: Vec<Metadata>) -> Self {
        Self { entries }
    }

    /// Number of slots (live and tombstoned alike).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends the metadata slot for a freshly assigned id.
    pub fn push(&mut self, metadata: Metadata) {
        self.entries.push(metadata);
    }

    /// Returns the metadata for `id`.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not exist.
    #[must_use]
    pub fn get(&self, id: NodeId) -> &Metadata {
        &self.entries[id.index()]
    }

    /// Replaces the metadata for `id`. Used by upsert.
    ///
    /// # Panics
    ///
    /// Panics if the slot does not exist.
    pub fn set(&mut self, id: NodeId, metadata: Metadata) {
        self.entries[id.index()] = metadata;
    }

    /// Empties the slot for a tombstoned id.
    pub fn remove(&mut self, id: NodeId) {
        if let Some(slot) = self.entries.get_mut(id.index()) {
            *slot = Metadata::new();
        }
    }

    /// Drops every slot.
    pub fn clear(&mut self) {
        self.entries = Vec::new();
    }

    /// Approximate heap bytes held by this store.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        let strings: usize = self
            .entries
            .iter()
            .flat_map(|m| m.iter())
            .map(|(k, v)| k.capacity() + v.capacity())
            .sum();
        strings + self.entries.capacity() * std::mem::size_of::<Metadata>()
    }
}

/// A set of key/value equality constraints applied to search results.
///
/// A result is kept iff every constraint matches its metadata. Filtering is
/// applied after graph and buffer search, not during traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    constraints: Vec<(String, String)>,
}

impl Filter {
    /// Creates an empty filter that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an equality constraint.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constraints.push((key.into(), value.into()));
        self
    }

    /// Whether `metadata` satisfies every constraint.
    #[must_use]
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.constraints
            .iter()
            .all(|(k, v)| metadata.get(k).is_some_and(|actual| actual == v))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Filter {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            constraints: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md(pairs: &[(&str, &str)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_push_get_set_remove() {
        let mut store = MetadataStore::new();
        store.push(md(&[("lang", "en")]));
        assert_eq!(store.get(NodeId(0)).get("lang").unwrap(), "en");

        store.set(NodeId(0), md(&[("lang", "de")]));
        assert_eq!(store.get(NodeId(0)).get("lang").unwrap(), "de");

        store.remove(NodeId(0));
        assert!(store.get(NodeId(0)).is_empty());
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = Filter::new();
        assert!(filter.matches(&Metadata::new()));
        assert!(filter.matches(&md(&[("a", "b")])));
    }

    #[test]
    fn test_filter_requires_all_constraints() {
        let filter = Filter::new().with("lang", "en").with("kind", "doc");
        assert!(filter.matches(&md(&[("lang", "en"), ("kind", "doc"), ("x", "y")])));
        assert!(!filter.matches(&md(&[("lang", "en")])));
        assert!(!filter.matches(&md(&[("lang", "de"), ("kind", "doc")])));
    }
}
