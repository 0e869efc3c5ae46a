//! Bounded cache of blocks rejected for consensus reasons.
//!
//! Oldest entries are evicted first once the capacity is reached.

use std::collections::{HashMap, VecDeque};

use shroud_core::error::BlockError;
use shroud_core::types::Hash256;

/// Why and where a block was rejected.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct InvalidBlock {
    pub height: u64,
    pub reason: BlockError,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidBlockCache {
    capacity: usize,
    order: VecDeque<Hash256>,
    entries: HashMap<Hash256, InvalidBlock>,
}

impl InvalidBlockCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    /// Rebuild from entries in insertion order.
    pub(crate) fn from_entries(capacity: usize, entries: Vec<(Hash256, InvalidBlock)>) -> Self {
        let mut cache = Self::new(capacity);
        for (id, entry) in entries {
            cache.insert(id, entry);
        }
        cache
    }

    /// Entries in insertion order.
    pub(crate) fn to_entries(&self) -> Vec<(Hash256, InvalidBlock)> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    pub fn get(&self, id: &Hash256) -> Option<&InvalidBlock> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &Hash256> {
        self.order.iter()
    }

    /// Remember `id` as invalid. Re-inserting refreshes the reason but keeps
    /// the original eviction slot.
    pub(crate) fn insert(&mut self, id: Hash256, entry: InvalidBlock) {
        if let Some(existing) = self.entries.get_mut(&id) {
            *existing = entry;
            return;
        }
        while self.entries.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.order.push_back(id);
        self.entries.insert(id, entry);
    }
}
