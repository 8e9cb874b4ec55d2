//! Request-scoped placeholder mapping
//!
//! A mapping is built by the anonymizer from one snapshot of the source text
//! and consumed by the deanonymizer for the same request. It is never shared
//! across requests or persisted.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub placeholder: String,
    pub entity_type: String,
    pub original: String,
    /// Character span `[start, end)` in the source text.
    pub source_span: (usize, usize),
}

/// Ordered placeholder → original table, in left-to-right source order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderMapping {
    entries: Vec<MappingEntry>,
    /// Placeholder-shaped literals already present in the source text.
    /// Never issued, and not reported as unmatched on restoration.
    reserved: BTreeSet<String>,
}

impl PlaceholderMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, entry: MappingEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn reserve(&mut self, token: &str) {
        self.reserved.insert(token.to_string());
    }

    pub fn is_reserved(&self, token: &str) -> bool {
        self.reserved.contains(token)
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.placeholder == placeholder)
            .map(|e| e.original.as_str())
    }

    pub fn contains_placeholder(&self, placeholder: &str) -> bool {
        self.entries.iter().any(|e| e.placeholder == placeholder)
    }

    /// Placeholder → original lookup table plus the placeholders ordered
    /// longest first, for the restoration scan.
    pub(crate) fn lookup_table(&self) -> (HashMap<&str, &str>, Vec<&str>) {
        let table: HashMap<&str, &str> = self
            .entries
            .iter()
            .map(|e| (e.placeholder.as_str(), e.original.as_str()))
            .collect();

        let mut tokens: Vec<&str> = table.keys().copied().collect();
        tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        (table, tokens)
    }

    /// Entity type → number of masked spans, for logging.
    pub fn counts_by_type(&self) -> HashMap<&str, usize> {
        let mut counts = HashMap::new();
        for entry in &self.entries {
            *counts.entry(entry.entity_type.as_str()).or_insert(0) += 1;
        }
        counts
    }
}
