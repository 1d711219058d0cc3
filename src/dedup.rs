//! Operation-scoped identity cache
//!
//! One [`Deduplicator`] lives for exactly one search, crawl or probe run. "Already seen"
//! is relative to that run, so the cache is never shared across operations and needs no
//! synchronisation: results are buffered first and merged on a single task.

use std::collections::HashSet;

use crate::models::{CandidateId, ItemId};

/// Set of item identities seen during one operation
#[derive(Debug, Default, Clone)]
pub struct Deduplicator {
    seen: HashSet<ItemId>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` was already marked
    pub fn seen(&self, id: &ItemId) -> bool {
        self.seen.contains(id)
    }

    /// Mark `id` as seen
    pub fn mark_seen(&mut self, id: ItemId) {
        self.seen.insert(id);
    }

    /// Mark `id` and report whether this was its first occurrence
    pub fn insert(&mut self, id: &ItemId) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.clone());
        true
    }

    /// Candidate-ID shorthand used by the crawler and the prober
    pub fn insert_candidate(&mut self, id: &CandidateId) -> bool {
        self.insert(&ItemId::Video(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
