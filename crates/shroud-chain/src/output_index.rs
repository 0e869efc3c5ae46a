//! Per-amount output log.
//!
//! Each denomination owns an append-only sequence; an output's position in
//! its sequence is the global index that ring inputs reference. Entries are
//! only ever appended at the tail and removed from the tail in the reverse
//! order of their appends, so every outstanding global index stays valid.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shroud_core::error::ChainStateError;
use shroud_core::types::{Hash256, PublicKey};

/// Where an output was defined: block height, transaction position within
/// the block (0 = miner tx) and output position within the transaction.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
    bincode::Encode, bincode::Decode,
)]
pub struct OutputEntry {
    pub block_height: u32,
    pub tx_in_block: u32,
    pub output_in_tx: u32,
}

/// An output referenced by global index, resolved to its transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingMember {
    pub txid: Hash256,
    pub output_index: u32,
    pub key: PublicKey,
    /// Height of the block that created the output.
    pub block_height: u64,
    /// Unlock time of the creating transaction.
    pub unlock_time: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputIndex {
    outputs: BTreeMap<u64, Vec<OutputEntry>>,
}

impl OutputIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(outputs: BTreeMap<u64, Vec<OutputEntry>>) -> Self {
        Self { outputs }
    }

    pub(crate) fn as_map(&self) -> &BTreeMap<u64, Vec<OutputEntry>> {
        &self.outputs
    }

    /// Append an entry for `amount`, returning its global index.
    pub(crate) fn append(&mut self, amount: u64, entry: OutputEntry) -> u64 {
        let seq = self.outputs.entry(amount).or_default();
        seq.push(entry);
        seq.len() as u64 - 1
    }

    /// Entry at `global_index` for `amount`.
    pub fn lookup(&self, amount: u64, global_index: u64) -> Result<OutputEntry, ChainStateError> {
        let seq = self.entries(amount);
        usize::try_from(global_index)
            .ok()
            .and_then(|i| seq.get(i))
            .copied()
            .ok_or(ChainStateError::OutputOutOfRange {
                amount,
                index: global_index,
                len: seq.len() as u64,
            })
    }

    /// Number of outputs of `amount`.
    pub fn len(&self, amount: u64) -> u64 {
        self.entries(amount).len() as u64
    }

    /// Number of outputs of `amount` defined by blocks below `height`.
    pub fn len_below(&self, amount: u64, height: u64) -> u64 {
        self.entries(amount)
            .partition_point(|entry| u64::from(entry.block_height) < height) as u64
    }

    /// All entries of `amount` in global-index order.
    pub fn entries(&self, amount: u64) -> &[OutputEntry] {
        self.outputs.get(&amount).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of distinct amounts with a sequence.
    pub fn amount_count(&self) -> usize {
        self.outputs.len()
    }

    /// Total outputs across all amounts.
    pub fn total_outputs(&self) -> usize {
        self.outputs.values().map(Vec::len).sum()
    }

    /// Shrink the sequence of `amount` to `count` entries. A sequence that
    /// becomes empty is dropped.
    pub(crate) fn truncate(&mut self, amount: u64, count: u64) -> Result<(), ChainStateError> {
        let len = self.len(amount);
        if count > len {
            return Err(ChainStateError::OutputOutOfRange {
                amount,
                index: count,
                len,
            });
        }
        if count == 0 {
            self.outputs.remove(&amount);
        } else if let Some(seq) = self.outputs.get_mut(&amount) {
            seq.truncate(count as usize);
        }
        Ok(())
    }

    /// Remove the tail entry of `amount`, which must equal `expected`.
    pub(crate) fn pop_expected(&mut self, amount: u64, expected: OutputEntry) -> Result<(), ChainStateError> {
        let len = self.len(amount);
        match self.entries(amount).last() {
            Some(tail) if *tail == expected => self.truncate(amount, len - 1),
            _ => Err(ChainStateError::OutputTailMismatch { amount }),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.outputs.clear();
    }
}
