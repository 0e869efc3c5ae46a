//! Collaborator interfaces consumed by the chain storage engine.
//!
//! - [`Verifier`]: proof-of-work, ring signatures and difficulty retarget
//! - [`TxPool`]: the mempool that holds transaction bodies until they are mined
//! - [`CheckpointSource`]: trusted `(height, id)` pins

use crate::difficulty;
use crate::error::BlockError;
use crate::types::{Block, Hash256, KeyImage, PublicKey, Signature, Transaction, TxInput};

/// Cryptographic and retarget checks the storage engine delegates.
///
/// Every call runs synchronously under the chain write lock, so
/// implementations must be bounded computations.
pub trait Verifier: Send + Sync {
    /// Whether the block's proof-of-work hash satisfies `difficulty`.
    fn check_proof_of_work(&self, block: &Block, difficulty: u64) -> bool;

    /// Verify one ring signature over `prefix_hash`.
    ///
    /// `ring` holds the output keys of the resolved ring members in offset
    /// order; `signatures` has one element per member.
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash256,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;

    /// Verify every ring input of `tx` against its resolved ring.
    ///
    /// `rings[i]` belongs to the i-th input. Default implementation calls
    /// [`check_ring_signature`](Self::check_ring_signature) per input.
    fn check_signatures(&self, tx: &Transaction, rings: &[Vec<PublicKey>]) -> bool {
        let Ok(prefix_hash) = tx.txid() else {
            return false;
        };
        if rings.len() != tx.inputs.len() || tx.signatures.len() != tx.inputs.len() {
            return false;
        }
        tx.inputs
            .iter()
            .zip(rings)
            .zip(&tx.signatures)
            .all(|((input, ring), sigs)| match input {
                TxInput::ToKey { key_image, .. } => {
                    self.check_ring_signature(&prefix_hash, key_image, ring, sigs)
                }
                TxInput::Gen { .. } => false,
            })
    }

    /// Difficulty for the block after the given ancestors (oldest first).
    ///
    /// Default implementation is [`difficulty::next_difficulty`].
    fn compute_next_difficulty(&self, timestamps: &[u64], cumulative_difficulties: &[u64]) -> u64 {
        difficulty::next_difficulty(timestamps, cumulative_difficulties)
    }
}

/// The transaction pool, consulted for bodies of transactions not yet mined.
pub trait TxPool: Send + Sync {
    /// Fetch a pooled transaction by id.
    fn lookup_transaction(&self, id: &Hash256) -> Option<Transaction>;

    /// The transaction was included in a main-chain block.
    fn notify_included(&self, id: &Hash256);

    /// The transaction left the main chain (block popped during a reorg or
    /// an aborted block application) and should return to the pool.
    fn notify_evicted(&self, id: &Hash256, tx: &Transaction);
}

/// Trusted checkpoints.
pub trait CheckpointSource: Send + Sync {
    /// Checkpointed block id at `height`, if any.
    fn checkpoint_at(&self, height: u64) -> Option<Hash256>;

    /// Highest checkpointed height that is `<= height`.
    fn last_checkpoint_at_or_below(&self, height: u64) -> Option<u64>;

    /// Highest checkpointed height overall.
    fn highest_checkpoint(&self) -> Option<u64>;

    /// Whether `height` is at or below the highest checkpoint.
    fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        self.highest_checkpoint().is_some_and(|top| height <= top)
    }

    /// Verify `id` against the checkpoint at `height`.
    ///
    /// Returns `Ok(true)` when the height is checkpointed and matches,
    /// `Ok(false)` when there is no checkpoint at that height.
    fn check_block(&self, height: u64, id: &Hash256) -> Result<bool, BlockError> {
        match self.checkpoint_at(height) {
            None => Ok(false),
            Some(expected) if expected == *id => Ok(true),
            Some(_) => Err(BlockError::CheckpointMismatch { height }),
        }
    }

    /// Whether an alternative block at `block_height` may be accepted while
    /// the main chain has `chain_height` blocks.
    ///
    /// Genesis can never be replaced, and nothing at or below the most recent
    /// checkpoint the main chain has passed can be reorganized away.
    fn is_alternative_block_allowed(&self, chain_height: u64, block_height: u64) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.last_checkpoint_at_or_below(chain_height) {
            None => true,
            Some(checkpoint_height) => checkpoint_height < block_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TxOutput;
    use std::collections::BTreeMap;

    /// Accepts a ring signature only when its first element's `c` is all ones.
    struct FlagVerifier;

    impl Verifier for FlagVerifier {
        fn check_proof_of_work(&self, _block: &Block, _difficulty: u64) -> bool {
            true
        }

        fn check_ring_signature(
            &self,
            _prefix_hash: &Hash256,
            _key_image: &KeyImage,
            ring: &[PublicKey],
            signatures: &[Signature],
        ) -> bool {
            ring.len() == signatures.len() && signatures.first().is_some_and(|s| s.c == [1; 32])
        }
    }

    struct MapCheckpoints(BTreeMap<u64, Hash256>);

    impl CheckpointSource for MapCheckpoints {
        fn checkpoint_at(&self, height: u64) -> Option<Hash256> {
            self.0.get(&height).copied()
        }

        fn last_checkpoint_at_or_below(&self, height: u64) -> Option<u64> {
            self.0.range(..=height).next_back().map(|(h, _)| *h)
        }

        fn highest_checkpoint(&self) -> Option<u64> {
            self.0.keys().next_back().copied()
        }
    }

    fn ring_tx(sig_c: u8) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TxInput::ToKey {
                amount: 10,
                key_offsets: vec![0],
                key_image: KeyImage([4; 32]),
            }],
            outputs: vec![TxOutput {
                amount: 9,
                key: PublicKey([5; 32]),
            }],
            extra: vec![],
            signatures: vec![vec![Signature {
                c: [sig_c; 32],
                r: [0; 32],
            }]],
        }
    }

    #[test]
    fn default_check_signatures_visits_every_input() {
        let rings = vec![vec![PublicKey([9; 32])]];
        assert!(FlagVerifier.check_signatures(&ring_tx(1), &rings));
        assert!(!FlagVerifier.check_signatures(&ring_tx(2), &rings));
    }

    #[test]
    fn default_check_signatures_rejects_ring_count_mismatch() {
        assert!(!FlagVerifier.check_signatures(&ring_tx(1), &[]));
    }

    #[test]
    fn default_difficulty_is_retarget() {
        assert_eq!(FlagVerifier.compute_next_difficulty(&[], &[]), 1);
    }

    #[test]
    fn checkpoint_check_block() {
        let cps = MapCheckpoints(BTreeMap::from([(10, Hash256([1; 32]))]));
        assert_eq!(cps.check_block(10, &Hash256([1; 32])), Ok(true));
        assert_eq!(cps.check_block(11, &Hash256([1; 32])), Ok(false));
        assert_eq!(
            cps.check_block(10, &Hash256([2; 32])),
            Err(BlockError::CheckpointMismatch { height: 10 })
        );
    }

    #[test]
    fn checkpoint_zone() {
        let cps = MapCheckpoints(BTreeMap::from([(10, Hash256([1; 32])), (20, Hash256([2; 32]))]));
        assert!(cps.is_in_checkpoint_zone(20));
        assert!(!cps.is_in_checkpoint_zone(21));
        assert!(!MapCheckpoints(BTreeMap::new()).is_in_checkpoint_zone(0));
    }

    #[test]
    fn alternative_blocks_respect_passed_checkpoints() {
        let cps = MapCheckpoints(BTreeMap::from([(10, Hash256([1; 32]))]));
        assert!(!cps.is_alternative_block_allowed(100, 0));
        // Chain has not reached the checkpoint yet.
        assert!(cps.is_alternative_block_allowed(5, 3));
        // Chain passed height 10: only blocks above it may compete.
        assert!(!cps.is_alternative_block_allowed(100, 10));
        assert!(cps.is_alternative_block_allowed(100, 11));
    }
}
