//! Reorg engine.
//!
//! Blocks that do not extend the main tip are checked as far as they can be
//! without chain context and buffered in the alternative pool. When a branch
//! becomes strictly heavier than the main chain (or carries a checkpointed
//! block) the engine switches:
//!
//! 1. pop main-chain blocks down to the fork height, keeping their bodies
//! 2. apply the branch through the ordinary acceptance path
//! 3. if any branch block fails, pop what was applied and re-apply the
//!    popped main chain, so the state ends exactly where it started
//!
//! Equal cumulative difficulty keeps the current main chain.

use tracing::{debug, error, info, warn};

use shroud_core::constants::{CURRENT_BLOCK_MAJOR_VERSION, DIFFICULTY_BLOCKS_COUNT, TIMESTAMP_CHECK_WINDOW};
use shroud_core::error::{BlockError, ChainStateError, RejectionKind, ShroudError};
use shroud_core::types::{Block, Hash256};

use crate::blockchain::{BlockAcceptance, Blockchain};
use crate::chain_index::BlockExtendedInfo;
use crate::invalid::InvalidBlock;
use crate::state::{ChainState, PoppedBlock};
use crate::validation::{check_block_timestamp, prevalidate_miner_transaction};

type Branch = Vec<(Hash256, BlockExtendedInfo)>;

impl Blockchain {
    /// Check and pool a block whose parent is not the main tip.
    pub(crate) fn handle_alternative_block(
        &self,
        state: &mut ChainState,
        block: &Block,
        id: Hash256,
    ) -> Result<BlockAcceptance, ShroudError> {
        let height = block
            .height()
            .ok_or_else(|| BlockError::MalformedMinerTx("expected a single coinbase input".into()))?;
        let chain_height = state.chain_height();
        if !self.checkpoints.is_alternative_block_allowed(chain_height, height)
            || height.saturating_add(self.config.alt_chain_retention) < chain_height
        {
            debug!(%id, height, chain_height, "alternative block below allowed height");
            return Err(BlockError::AlternativeNotAllowed { height }.into());
        }
        if block.header.major_version != CURRENT_BLOCK_MAJOR_VERSION {
            return Err(BlockError::UnsupportedVersion(block.header.major_version).into());
        }

        let prev_id = block.header.prev_id;
        let branch = state.alternatives.branch_ending_at(&prev_id);
        let fork_parent = branch
            .first()
            .map_or(prev_id, |(_, root)| root.block.header.prev_id);
        let Some(fork_parent_height) = state.index.height_of(&fork_parent) else {
            debug!(%id, %prev_id, "block parent unknown, orphaned");
            return Ok(BlockAcceptance::Orphan);
        };
        let fork_height = fork_parent_height + 1;

        let expected = fork_height + branch.len() as u64;
        if height != expected {
            return Err(BlockError::MinerHeightMismatch {
                expected,
                got: height,
            }
            .into());
        }
        prevalidate_miner_transaction(block, height)?;

        let timestamps = branch_timestamps(state, &branch, fork_height);
        check_block_timestamp(&timestamps, block.header.timestamp, self.now())?;

        let checkpointed = self.checkpoints.check_block(height, &id)?;
        let difficulty = self.alternative_difficulty(state, &branch, fork_height);
        if difficulty == 0 {
            return Err(BlockError::InvalidProofOfWork { difficulty }.into());
        }
        if !self.checkpoints.is_in_checkpoint_zone(height)
            && !self.verifier.check_proof_of_work(block, difficulty)
        {
            return Err(BlockError::InvalidProofOfWork { difficulty }.into());
        }

        let parent_difficulty = match branch.last() {
            Some((_, parent)) => parent.cumulative_difficulty,
            None => state
                .index
                .block_at(fork_parent_height)
                .map_or(0, |parent| parent.cumulative_difficulty),
        };
        let cumulative_difficulty = parent_difficulty.saturating_add(difficulty);
        state.alternatives.insert(
            id,
            BlockExtendedInfo {
                block: block.clone(),
                height,
                block_cumulative_size: block.miner_tx.blob_size()? as u64,
                cumulative_difficulty,
                already_generated_coins: 0,
            },
        );

        let main_difficulty = state
            .index
            .tip_info()
            .map_or(0, |tip| tip.cumulative_difficulty);

        if checkpointed {
            info!(%id, height, "checkpointed block on alternative chain, switching");
            let branch = state.alternatives.branch_ending_at(&id);
            self.switch_to_alternative_blockchain(state, branch, true)
        } else if main_difficulty < cumulative_difficulty {
            info!(
                %id,
                height,
                main_difficulty,
                alternative_difficulty = cumulative_difficulty,
                "alternative chain is heavier, switching"
            );
            let branch = state.alternatives.branch_ending_at(&id);
            self.switch_to_alternative_blockchain(state, branch, self.config.discard_disconnected_chain)
        } else {
            info!(
                %id,
                height,
                difficulty,
                cumulative_difficulty,
                "block added as alternative"
            );
            Ok(BlockAcceptance::Alternative { height })
        }
    }

    /// Difficulty for a block extending `branch`, whose first block sits at
    /// `fork_height`. Main-chain ancestors fill the window when the branch is
    /// shorter than it.
    fn alternative_difficulty(&self, state: &ChainState, branch: &[(Hash256, BlockExtendedInfo)], fork_height: u64) -> u64 {
        let mut timestamps = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT);
        let mut cumulative = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT);

        if branch.len() < DIFFICULTY_BLOCKS_COUNT {
            let needed = (DIFFICULTY_BLOCKS_COUNT - branch.len()) as u64;
            let start = fork_height.saturating_sub(needed).max(1);
            for info in (start..fork_height).filter_map(|h| state.index.block_at(h)) {
                timestamps.push(info.block.header.timestamp);
                cumulative.push(info.cumulative_difficulty);
            }
        }
        let skip = branch.len().saturating_sub(DIFFICULTY_BLOCKS_COUNT);
        for (_, info) in &branch[skip..] {
            timestamps.push(info.block.header.timestamp);
            cumulative.push(info.cumulative_difficulty);
        }
        self.verifier.compute_next_difficulty(&timestamps, &cumulative)
    }

    /// Replace the main chain above the fork with `branch` (root first).
    fn switch_to_alternative_blockchain(
        &self,
        state: &mut ChainState,
        branch: Branch,
        discard_disconnected: bool,
    ) -> Result<BlockAcceptance, ShroudError> {
        let fork_height = branch
            .first()
            .map(|(_, root)| root.height)
            .ok_or(ChainStateError::EmptyChain)?;

        let mut original_chain = Vec::new();
        while state.chain_height() > fork_height {
            original_chain.push(self.pop_block_from_blockchain(state)?);
        }
        original_chain.reverse();

        for (i, (id, info)) in branch.iter().enumerate() {
            let Err(err) = self.handle_block_to_main_chain(state, &info.block, *id, None) else {
                continue;
            };
            self.rollback_blockchain_switching(state, &original_chain, fork_height)?;
            let reason = match err {
                ShroudError::Block(reason) => reason,
                other => return Err(other),
            };
            warn!(
                %id,
                height = info.height,
                %reason,
                restored_height = state.chain_height(),
                "switch to alternative chain failed, main chain restored"
            );
            if reason.kind() == RejectionKind::Consensus {
                for (bad_id, bad) in &branch[i..] {
                    state.alternatives.remove(bad_id);
                    state.invalid.insert(
                        *bad_id,
                        InvalidBlock {
                            height: bad.height,
                            reason: reason.clone(),
                        },
                    );
                }
            }
            return Err(BlockError::AlternativeChainFailed {
                id: id.to_string(),
                reason: Box::new(reason),
            }
            .into());
        }

        for (id, _) in &branch {
            state.alternatives.remove(id);
        }
        let disconnected = original_chain.len();
        if !discard_disconnected {
            for popped in original_chain {
                state.alternatives.insert(popped.id, popped.info);
            }
        }

        let height = state.chain_height().saturating_sub(1);
        info!(
            fork_height,
            height,
            disconnected,
            tip = %state.tail_id(),
            "switched to alternative chain"
        );
        Ok(BlockAcceptance::Reorganized {
            height,
            fork_height,
            disconnected,
        })
    }

    /// Undo a partially applied switch and restore `original_chain`.
    fn rollback_blockchain_switching(
        &self,
        state: &mut ChainState,
        original_chain: &[PoppedBlock],
        fork_height: u64,
    ) -> Result<(), ShroudError> {
        while state.chain_height() > fork_height {
            self.pop_block_from_blockchain(state)?;
        }
        for popped in original_chain {
            if let Err(err) = self.handle_block_to_main_chain(
                state,
                &popped.info.block,
                popped.id,
                Some(&popped.transactions),
            ) {
                error!(id = %popped.id, height = popped.info.height, %err, "failed to restore original chain");
                return Err(err);
            }
        }
        debug!(fork_height, restored = original_chain.len(), "original chain restored");
        Ok(())
    }

    /// Pop the main tip and hand its transactions back to the pool.
    pub(crate) fn pop_block_from_blockchain(
        &self,
        state: &mut ChainState,
    ) -> Result<PoppedBlock, ShroudError> {
        let popped = state.pop_block()?;
        for (txid, tx) in popped.info.block.tx_hashes.iter().zip(&popped.transactions) {
            self.pool.notify_evicted(txid, tx);
        }
        self.refresh_checkpoint_zone(state.chain_height());
        debug!(id = %popped.id, height = popped.info.height, "block popped from main chain");
        Ok(popped)
    }
}

/// Up to a timestamp window of ancestors for a block extending `branch`:
/// main-chain blocks below the fork followed by the branch itself.
fn branch_timestamps(state: &ChainState, branch: &[(Hash256, BlockExtendedInfo)], fork_height: u64) -> Vec<u64> {
    let mut timestamps = Vec::with_capacity(TIMESTAMP_CHECK_WINDOW);
    if branch.len() < TIMESTAMP_CHECK_WINDOW {
        timestamps = state
            .index
            .timestamps_before(fork_height, TIMESTAMP_CHECK_WINDOW - branch.len());
    }
    let skip = branch.len().saturating_sub(TIMESTAMP_CHECK_WINDOW);
    timestamps.extend(branch[skip..].iter().map(|(_, info)| info.block.header.timestamp));
    timestamps
}
