use crate::types::{Root, StateSummary};
use parking_lot::RwLock;
use std::collections::HashMap;

/// State summaries kept in memory by the caller and shared with the store, which consults it
/// before reading summaries from disk. The store never creates or clears it on its own.
#[derive(Debug, Default)]
pub struct StateSummaryCache {
    summaries: RwLock<HashMap<Root, StateSummary>>,
}

impl StateSummaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, root: Root, summary: StateSummary) {
        self.summaries.write().insert(root, summary);
    }

    pub fn get(&self, root: &Root) -> Option<StateSummary> {
        self.summaries.read().get(root).copied()
    }

    pub fn has(&self, root: &Root) -> bool {
        self.summaries.read().contains_key(root)
    }

    pub fn len(&self) -> usize {
        self.summaries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.read().is_empty()
    }

    pub fn clear(&self) {
        self.summaries.write().clear();
    }
}
