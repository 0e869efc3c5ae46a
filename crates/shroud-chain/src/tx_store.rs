//! Confirmed transactions keyed by id.

use std::collections::HashMap;

use shroud_core::error::ChainStateError;
use shroud_core::types::{Hash256, Transaction};

/// A confirmed transaction and where its outputs landed.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct TransactionChainEntry {
    pub tx: Transaction,
    /// Height of the block that included the transaction.
    pub keeper_block_height: u64,
    /// Global index of each output within its amount's sequence.
    pub global_output_indexes: Vec<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionStore {
    entries: HashMap<Hash256, TransactionChainEntry>,
}

impl TransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(entries: HashMap<Hash256, TransactionChainEntry>) -> Self {
        Self { entries }
    }

    pub(crate) fn as_map(&self) -> &HashMap<Hash256, TransactionChainEntry> {
        &self.entries
    }

    pub fn get(&self, id: &Hash256) -> Option<&TransactionChainEntry> {
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

    pub(crate) fn insert(&mut self, id: Hash256, entry: TransactionChainEntry) -> Result<(), ChainStateError> {
        if self.entries.contains_key(&id) {
            return Err(ChainStateError::DuplicateTransaction(id.to_string()));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    pub(crate) fn remove(&mut self, id: &Hash256) -> Option<TransactionChainEntry> {
        self.entries.remove(id)
    }

    pub(crate) fn get_mut(&mut self, id: &Hash256) -> Option<&mut TransactionChainEntry> {
        self.entries.get_mut(id)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
