//! Result Cache - per-session memo of search results by canonical query

use crate::types::SearchResult;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// Insert-only map; the first result stored for a query is kept
#[derive(Debug, Clone, Default)]
pub struct ResultCache {
    entries: HashMap<String, SearchResult>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, canonical: &str) -> Option<&SearchResult> {
        self.entries.get(canonical)
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.entries.contains_key(canonical)
    }

    /// Returns false, leaving the entry untouched, when the query is already cached
    pub fn insert(&mut self, canonical: impl Into<String>, result: SearchResult) -> bool {
        match self.entries.entry(canonical.into()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
