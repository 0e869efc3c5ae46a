//! Checkpoint list.
//!
//! Pins known-good block ids at fixed heights. A block at a checkpointed
//! height must carry the pinned id, and once the main chain has passed a
//! checkpoint nothing at or below it can be reorganized away.
//!
//! # Attack vectors
//!
//! - **Long-range rewrite:** without checkpoints an attacker with enough hash
//!   power could rebuild arbitrarily deep history. Alternative blocks at or
//!   below the last passed checkpoint are refused before any validation.
//!
//! - **Checkpoint spoofing:** checkpoints come from the node operator
//!   (compiled in or configured), never from peers.

use std::collections::BTreeMap;

use shroud_core::error::ShroudError;
use shroud_core::traits::CheckpointSource;
use shroud_core::types::Hash256;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoints {
    points: BTreeMap<u64, Hash256>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a checkpoint from a hex-encoded block id.
    ///
    /// Adding a different id at an already pinned height is an error.
    pub fn add_checkpoint(&mut self, height: u64, hex_id: &str) -> Result<(), ShroudError> {
        let bytes = hex::decode(hex_id)
            .map_err(|e| ShroudError::Config(format!("checkpoint {height}: {e}")))?;
        let id: [u8; 32] = bytes.try_into().map_err(|_| {
            ShroudError::Config(format!("checkpoint {height}: id must be 32 bytes"))
        })?;
        self.insert(height, Hash256(id))
    }

    pub fn insert(&mut self, height: u64, id: Hash256) -> Result<(), ShroudError> {
        match self.points.get(&height) {
            Some(existing) if *existing != id => Err(ShroudError::Config(format!(
                "conflicting checkpoint at height {height}"
            ))),
            _ => {
                self.points.insert(height, id);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &BTreeMap<u64, Hash256> {
        &self.points
    }
}

impl CheckpointSource for Checkpoints {
    fn checkpoint_at(&self, height: u64) -> Option<Hash256> {
        self.points.get(&height).copied()
    }

    fn last_checkpoint_at_or_below(&self, height: u64) -> Option<u64> {
        self.points.range(..=height).next_back().map(|(h, _)| *h)
    }

    fn highest_checkpoint(&self) -> Option<u64> {
        self.points.keys().next_back().copied()
    }
}
