//! Main-chain block records, addressable by height and by id.
//!
//! Records live in a height-indexed `Vec` with a separate id -> height table,
//! so popping the tip is a truncation and `hash_at`/`height_of` stay mutual
//! inverses after every push and pop.

use std::collections::HashMap;

use shroud_core::error::{ChainStateError, PersistenceError};
use shroud_core::types::{Block, Hash256};

/// A block together with the chain totals computed when it was accepted.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct BlockExtendedInfo {
    pub block: Block,
    pub height: u64,
    /// Bytes of the miner transaction plus every included transaction.
    pub block_cumulative_size: u64,
    /// Sum of block difficulties from genesis through this block.
    pub cumulative_difficulty: u64,
    /// Coins minted from genesis through this block.
    pub already_generated_coins: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainIndex {
    blocks: Vec<BlockExtendedInfo>,
    ids: Vec<Hash256>,
    by_id: HashMap<Hash256, u64>,
}

impl ChainIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted parts, checking that the block sequence and the
    /// id index describe the same chain.
    pub(crate) fn from_parts(
        blocks: Vec<BlockExtendedInfo>,
        by_id: HashMap<Hash256, u64>,
    ) -> Result<Self, PersistenceError> {
        if blocks.len() != by_id.len() {
            return Err(PersistenceError::IndexMismatch(format!(
                "{} blocks, {} index entries",
                blocks.len(),
                by_id.len()
            )));
        }
        let mut ids = vec![Hash256::ZERO; blocks.len()];
        let mut filled = vec![false; blocks.len()];
        for (id, height) in &by_id {
            let slot = usize::try_from(*height)
                .ok()
                .filter(|h| *h < blocks.len() && !filled[*h])
                .ok_or_else(|| {
                    PersistenceError::IndexMismatch(format!("{id} indexed at height {height}"))
                })?;
            ids[slot] = *id;
            filled[slot] = true;
        }
        for (height, info) in blocks.iter().enumerate() {
            if info.height != height as u64 {
                return Err(PersistenceError::IndexMismatch(format!(
                    "record at position {height} claims height {}",
                    info.height
                )));
            }
        }
        Ok(Self { blocks, ids, by_id })
    }

    /// Number of blocks on the main chain (tip height + 1).
    pub fn len(&self) -> u64 {
        self.blocks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn height_of(&self, id: &Hash256) -> Option<u64> {
        self.by_id.get(id).copied()
    }

    pub fn hash_at(&self, height: u64) -> Option<Hash256> {
        self.ids.get(usize::try_from(height).ok()?).copied()
    }

    pub fn block_at(&self, height: u64) -> Option<&BlockExtendedInfo> {
        self.blocks.get(usize::try_from(height).ok()?)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.by_id.contains_key(id)
    }

    /// `(height, id)` of the tip.
    pub fn tip(&self) -> Option<(u64, Hash256)> {
        let id = *self.ids.last()?;
        Some((self.len() - 1, id))
    }

    pub fn tip_info(&self) -> Option<&BlockExtendedInfo> {
        self.blocks.last()
    }

    /// Records in height order.
    pub fn blocks(&self) -> &[BlockExtendedInfo] {
        &self.blocks
    }

    pub(crate) fn id_index(&self) -> &HashMap<Hash256, u64> {
        &self.by_id
    }

    /// Sizes of up to `count` blocks ending at the tip, oldest first.
    pub fn last_block_sizes(&self, count: usize) -> Vec<u64> {
        let start = self.blocks.len().saturating_sub(count);
        self.blocks[start..]
            .iter()
            .map(|b| b.block_cumulative_size)
            .collect()
    }

    /// Timestamps of up to `count` blocks ending at `end` (exclusive), oldest first.
    pub fn timestamps_before(&self, end: u64, count: usize) -> Vec<u64> {
        let end = usize::try_from(end).unwrap_or(usize::MAX).min(self.blocks.len());
        let start = end.saturating_sub(count);
        self.blocks[start..end]
            .iter()
            .map(|b| b.block.header.timestamp)
            .collect()
    }

    pub(crate) fn push(&mut self, id: Hash256, info: BlockExtendedInfo) -> Result<u64, ChainStateError> {
        let height = self.len();
        if info.height != height {
            return Err(ChainStateError::HeightMismatch {
                expected: height,
                got: info.height,
            });
        }
        if self.by_id.contains_key(&id) {
            return Err(ChainStateError::DuplicateBlock(id.to_string()));
        }
        self.by_id.insert(id, height);
        self.blocks.push(info);
        self.ids.push(id);
        Ok(height)
    }

    pub(crate) fn pop(&mut self) -> Option<(Hash256, BlockExtendedInfo)> {
        let info = self.blocks.pop()?;
        let id = self.ids.pop()?;
        self.by_id.remove(&id);
        Some((id, info))
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
        self.ids.clear();
        self.by_id.clear();
    }
}
