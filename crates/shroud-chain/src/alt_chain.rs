//! Pool of blocks on side branches of the main chain.
//!
//! Branches are not stored as linked structures: each record keeps its
//! parent id, and a branch is recovered by walking parents until the walk
//! leaves the pool.

use std::collections::HashMap;

use shroud_core::types::Hash256;

use crate::chain_index::BlockExtendedInfo;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlternativeChains {
    blocks: HashMap<Hash256, BlockExtendedInfo>,
}

impl AlternativeChains {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_map(blocks: HashMap<Hash256, BlockExtendedInfo>) -> Self {
        Self { blocks }
    }

    pub(crate) fn as_map(&self) -> &HashMap<Hash256, BlockExtendedInfo> {
        &self.blocks
    }

    pub fn get(&self, id: &Hash256) -> Option<&BlockExtendedInfo> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Hash256, &BlockExtendedInfo)> {
        self.blocks.iter()
    }

    pub(crate) fn insert(&mut self, id: Hash256, info: BlockExtendedInfo) {
        self.blocks.insert(id, info);
    }

    pub(crate) fn remove(&mut self, id: &Hash256) -> Option<BlockExtendedInfo> {
        self.blocks.remove(id)
    }

    pub(crate) fn clear(&mut self) {
        self.blocks.clear();
    }

    /// Pooled ancestors of a block whose parent is `tip`, root first,
    /// `tip` last. Empty when `tip` is not pooled.
    pub fn branch_ending_at(&self, tip: &Hash256) -> Vec<(Hash256, BlockExtendedInfo)> {
        let mut branch = Vec::new();
        let mut cursor = *tip;
        while let Some(info) = self.blocks.get(&cursor) {
            branch.push((cursor, info.clone()));
            if branch.len() > self.blocks.len() {
                break;
            }
            cursor = info.block.header.prev_id;
        }
        branch.reverse();
        branch
    }

    /// Drop blocks below `min_height`, then every block whose ancestry no
    /// longer reaches the main chain. Returns how many were dropped.
    pub(crate) fn discard_stale(
        &mut self,
        min_height: u64,
        on_main_chain: impl Fn(&Hash256) -> bool,
    ) -> usize {
        let before = self.blocks.len();
        self.blocks.retain(|_, info| info.height >= min_height);
        loop {
            let detached: Vec<Hash256> = self
                .blocks
                .iter()
                .filter(|(_, info)| {
                    let parent = &info.block.header.prev_id;
                    !self.blocks.contains_key(parent) && !on_main_chain(parent)
                })
                .map(|(id, _)| *id)
                .collect();
            if detached.is_empty() {
                break;
            }
            for id in detached {
                self.blocks.remove(&id);
            }
        }
        before - self.blocks.len()
    }
}
