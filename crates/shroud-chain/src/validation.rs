//! Validation coordinator.
//!
//! The free functions are the rule checks that need no chain context. The
//! `Blockchain` methods below combine them with chain lookups and the
//! [`Verifier`](shroud_core::traits::Verifier) into the main-chain acceptance
//! path:
//!
//! 1. prev id, version, coinbase shape and duplicate hashes
//! 2. timestamp against the clock and the median of recent ancestors
//! 3. proof of work at the retargeted difficulty, or the checkpoint when the
//!    block is inside the checkpoint zone
//! 4. every included transaction: shape, spent key images, ring resolution,
//!    unlock times and signatures, applied one by one
//! 5. coinbase amount against reward plus fees
//!
//! A failure at any step undoes whatever the block had applied, so a
//! rejected block leaves no trace in the chain containers.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use shroud_core::constants::{
    BLOCK_FUTURE_TIME_LIMIT, CURRENT_BLOCK_MAJOR_VERSION, DIFFICULTY_BLOCKS_COUNT,
    LOCKED_TX_ALLOWED_DELTA_BLOCKS, LOCKED_TX_ALLOWED_DELTA_SECONDS, MAX_BLOCK_NUMBER,
    MINED_MONEY_UNLOCK_WINDOW, REWARD_BLOCKS_WINDOW, TIMESTAMP_CHECK_WINDOW,
};
use shroud_core::error::{BlockError, ChainStateError, ShroudError, TransactionError};
use shroud_core::reward;
use shroud_core::types::{Block, Hash256, PublicKey, Transaction, TxInput};
use shroud_core::util;

use crate::blockchain::Blockchain;
use crate::chain_index::BlockExtendedInfo;
use crate::output_index::RingMember;
use crate::state::ChainState;

/// What the header checks established about a candidate block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockVerdict {
    pub difficulty: u64,
    /// Checkpoint zone: proof of work and ring signatures are not verified.
    pub in_checkpoint_zone: bool,
}

/// Shape rules for a non-coinbase transaction.
pub fn check_tx_semantics(tx: &Transaction) -> Result<(), TransactionError> {
    if tx.inputs.is_empty() {
        return Err(TransactionError::NoInputs);
    }
    let mut images = HashSet::with_capacity(tx.inputs.len());
    for (index, input) in tx.inputs.iter().enumerate() {
        let TxInput::ToKey {
            key_offsets,
            key_image,
            ..
        } = input
        else {
            return Err(TransactionError::UnexpectedInputType { index });
        };
        if key_offsets.is_empty() {
            return Err(TransactionError::EmptyRing { index });
        }
        let got = tx.signatures.get(index).map_or(0, Vec::len);
        if got != key_offsets.len() {
            return Err(TransactionError::SignatureCountMismatch {
                index,
                expected: key_offsets.len(),
                got,
            });
        }
        if !images.insert(key_image) {
            return Err(TransactionError::DuplicateKeyImage(key_image.to_string()));
        }
    }
    if tx.signatures.len() != tx.inputs.len() {
        return Err(TransactionError::SignatureCountMismatch {
            index: tx.inputs.len(),
            expected: tx.inputs.len(),
            got: tx.signatures.len(),
        });
    }

    let inputs = tx
        .total_input_amount()
        .ok_or(TransactionError::ValueOverflow)?;
    let outputs = tx
        .total_output_amount()
        .ok_or(TransactionError::ValueOverflow)?;
    if outputs > inputs {
        return Err(TransactionError::OutputsExceedInputs { inputs, outputs });
    }
    Ok(())
}

/// Coinbase rules that need only the block and its height.
pub fn prevalidate_miner_transaction(block: &Block, height: u64) -> Result<(), BlockError> {
    let miner_tx = &block.miner_tx;
    match miner_tx.inputs.as_slice() {
        [TxInput::Gen { height: got }] if *got == height => {}
        [TxInput::Gen { height: got }] => {
            return Err(BlockError::MinerHeightMismatch {
                expected: height,
                got: *got,
            });
        }
        _ => {
            return Err(BlockError::MalformedMinerTx(
                "expected a single coinbase input".into(),
            ));
        }
    }

    let expected = height.saturating_add(MINED_MONEY_UNLOCK_WINDOW);
    if miner_tx.unlock_time != expected {
        return Err(BlockError::MinerUnlockTime {
            expected,
            got: miner_tx.unlock_time,
        });
    }
    if miner_tx.total_output_amount().is_none() {
        return Err(BlockError::MalformedMinerTx("output amounts overflow".into()));
    }
    Ok(())
}

/// `timestamp` must not run ahead of `now` by more than the future limit,
/// and must exceed the median of `ancestors` once a full window exists.
pub fn check_block_timestamp(ancestors: &[u64], timestamp: u64, now: u64) -> Result<(), BlockError> {
    let limit = now.saturating_add(BLOCK_FUTURE_TIME_LIMIT);
    if timestamp > limit {
        return Err(BlockError::TimestampTooFar { timestamp, limit });
    }
    if ancestors.len() < TIMESTAMP_CHECK_WINDOW {
        return Ok(());
    }
    let window = &ancestors[ancestors.len() - TIMESTAMP_CHECK_WINDOW..];
    let median = util::median(window.to_vec());
    if timestamp <= median {
        return Err(BlockError::TimestampBelowMedian { timestamp, median });
    }
    Ok(())
}

/// Whether an output with `unlock_time` may be spent in the next block of a
/// chain holding `chain_height` blocks.
pub fn is_unlocked(unlock_time: u64, chain_height: u64, now: u64) -> bool {
    if unlock_time < MAX_BLOCK_NUMBER {
        chain_height.saturating_sub(1) + LOCKED_TX_ALLOWED_DELTA_BLOCKS >= unlock_time
    } else {
        now.saturating_add(LOCKED_TX_ALLOWED_DELTA_SECONDS) >= unlock_time
    }
}

/// Check the coinbase claim against reward plus fees. Returns the reward.
pub fn validate_miner_transaction(
    block: &Block,
    block_size: u64,
    median_size: u64,
    already_generated_coins: u64,
    fees: u64,
) -> Result<u64, BlockError> {
    let reward = reward::block_reward(median_size, block_size, already_generated_coins)
        .ok_or(BlockError::Oversized {
            size: block_size,
            limit: reward::max_block_size(median_size),
        })?;
    let claimed = block
        .miner_tx
        .total_output_amount()
        .ok_or_else(|| BlockError::MalformedMinerTx("output amounts overflow".into()))?;
    let allowed = reward.saturating_add(fees);
    if claimed > allowed {
        return Err(BlockError::RewardTooHigh {
            got: claimed,
            allowed,
        });
    }
    Ok(reward)
}

/// Resolve absolute global indexes of `amount` to their outputs.
///
/// Only outputs of connected blocks are referenceable. While a block is
/// being applied its own outputs are already in the index, so they are cut
/// off by height. An index past the referenceable range is a consensus
/// failure of the referencing transaction, not a broken index.
pub(crate) fn resolve_ring(
    state: &ChainState,
    amount: u64,
    absolute_offsets: &[u64],
) -> Result<Vec<RingMember>, ShroudError> {
    let len = state.outputs.len_below(amount, state.chain_height());
    absolute_offsets
        .iter()
        .map(|&index| {
            if index >= len {
                return Err(TransactionError::RingIndexOutOfRange { amount, index, len }.into());
            }
            state.resolve_output(amount, index).map_err(|e| match e {
                ShroudError::ChainState(ChainStateError::OutputOutOfRange { amount, index, len }) => {
                    TransactionError::RingIndexOutOfRange { amount, index, len }.into()
                }
                other => other,
            })
        })
        .collect()
}

/// Attribute a transaction failure to its position in the block.
fn in_block(index: usize) -> impl Fn(ShroudError) -> ShroudError {
    move |err| match err {
        ShroudError::Transaction(source) => BlockError::TransactionError { index, source }.into(),
        other => other,
    }
}

impl Blockchain {
    /// Difficulty for the next main-chain block.
    pub(crate) fn next_difficulty(&self, state: &ChainState) -> u64 {
        let len = state.chain_height();
        let start = len.saturating_sub(DIFFICULTY_BLOCKS_COUNT as u64).max(1);
        let (timestamps, cumulative): (Vec<u64>, Vec<u64>) = (start..len)
            .filter_map(|h| state.index.block_at(h))
            .map(|info| (info.block.header.timestamp, info.cumulative_difficulty))
            .unzip();
        self.verifier.compute_next_difficulty(&timestamps, &cumulative)
    }

    /// Header-level checks of a block meant to extend the main tip at
    /// `height`.
    pub(crate) fn validate_block(
        &self,
        state: &ChainState,
        block: &Block,
        id: &Hash256,
        height: u64,
    ) -> Result<BlockVerdict, BlockError> {
        if block.header.major_version != CURRENT_BLOCK_MAJOR_VERSION {
            return Err(BlockError::UnsupportedVersion(block.header.major_version));
        }
        let tail = state.tail_id();
        if block.header.prev_id != tail {
            return Err(BlockError::WrongPrevId {
                expected: tail.to_string(),
                got: block.header.prev_id.to_string(),
            });
        }
        prevalidate_miner_transaction(block, height)?;

        let mut seen = HashSet::with_capacity(block.tx_hashes.len());
        if let Some(dup) = block.tx_hashes.iter().find(|h| !seen.insert(*h)) {
            return Err(BlockError::DuplicateTxHash(dup.to_string()));
        }

        let ancestors = state.index.timestamps_before(height, TIMESTAMP_CHECK_WINDOW);
        check_block_timestamp(&ancestors, block.header.timestamp, self.now())?;

        let difficulty = self.next_difficulty(state);
        if difficulty == 0 {
            return Err(BlockError::InvalidProofOfWork { difficulty });
        }

        let in_checkpoint_zone = self.checkpoints.is_in_checkpoint_zone(height);
        if in_checkpoint_zone {
            self.checkpoints.check_block(height, id)?;
        } else if !self.verifier.check_proof_of_work(block, difficulty) {
            return Err(BlockError::InvalidProofOfWork { difficulty });
        }

        Ok(BlockVerdict {
            difficulty,
            in_checkpoint_zone,
        })
    }

    /// Check every ring input of `tx` against the current chain. Returns the
    /// highest block height any ring member comes from.
    pub(crate) fn check_tx_inputs_with(
        &self,
        state: &ChainState,
        tx: &Transaction,
        verify_signatures: bool,
    ) -> Result<u64, ShroudError> {
        let chain_height = state.chain_height();
        let now = self.now();
        let mut rings: Vec<Vec<PublicKey>> = Vec::with_capacity(tx.inputs.len());
        let mut max_used_height = 0;

        for (index, input) in tx.inputs.iter().enumerate() {
            let TxInput::ToKey {
                amount,
                key_offsets,
                key_image,
            } = input
            else {
                return Err(TransactionError::UnexpectedInputType { index }.into());
            };
            if state.spent.is_spent(key_image) {
                return Err(TransactionError::KeyImageSpent(key_image.to_string()).into());
            }

            let absolute = util::relative_offsets_to_absolute(key_offsets).ok_or(
                TransactionError::RingIndexOutOfRange {
                    amount: *amount,
                    index: u64::MAX,
                    len: state.outputs.len_below(*amount, chain_height),
                },
            )?;
            let members = resolve_ring(state, *amount, &absolute)?;
            for (member, resolved) in members.iter().enumerate() {
                if !is_unlocked(resolved.unlock_time, chain_height, now) {
                    return Err(TransactionError::LockedRingMember { index, member }.into());
                }
                max_used_height = max_used_height.max(resolved.block_height);
            }
            rings.push(members.iter().map(|m| m.key).collect());
        }

        if verify_signatures && !self.verifier.check_signatures(tx, &rings) {
            let prefix_hash = tx.txid()?;
            let index = tx
                .inputs
                .iter()
                .zip(&rings)
                .zip(&tx.signatures)
                .position(|((input, ring), sigs)| {
                    input.key_image().is_none_or(|image| {
                        !self
                            .verifier
                            .check_ring_signature(&prefix_hash, image, ring, sigs)
                    })
                })
                .unwrap_or(0);
            return Err(TransactionError::InvalidSignature { index }.into());
        }
        Ok(max_used_height)
    }

    /// Validate `block` and apply it on top of the main chain.
    ///
    /// Transaction bodies come from `bodies` when given (aligned with
    /// `tx_hashes`), otherwise from the pool. Returns the new block's height.
    pub(crate) fn handle_block_to_main_chain(
        &self,
        state: &mut ChainState,
        block: &Block,
        id: Hash256,
        bodies: Option<&[Transaction]>,
    ) -> Result<u64, ShroudError> {
        let height = state.chain_height();
        let verdict = match self.validate_block(state, block, &id, height) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(%id, height, %err, "block rejected");
                return Err(err.into());
            }
        };

        let mut applied = 0;
        match self.apply_block(state, block, id, height, bodies, verdict, &mut applied) {
            Ok(size) => {
                for txid in &block.tx_hashes {
                    self.pool.notify_included(txid);
                }
                self.refresh_checkpoint_zone(height + 1);
                info!(
                    height,
                    %id,
                    difficulty = verdict.difficulty,
                    txs = block.tx_hashes.len(),
                    size,
                    "block added to main chain"
                );
                Ok(height)
            }
            Err(err) => {
                let partial = BlockExtendedInfo {
                    block: block.clone(),
                    height,
                    block_cumulative_size: 0,
                    cumulative_difficulty: 0,
                    already_generated_coins: 0,
                };
                if let Err(undo) = state.purge_block_data(&partial, applied) {
                    error!(%id, height, %undo, "failed to undo rejected block");
                    return Err(undo);
                }
                warn!(%id, height, %err, "block rejected");
                Err(err)
            }
        }
    }

    /// Steps 4 and 5 of acceptance. `applied` tracks how many transactions
    /// (miner tx first) have been written so the caller can undo them.
    #[allow(clippy::too_many_arguments)]
    fn apply_block(
        &self,
        state: &mut ChainState,
        block: &Block,
        id: Hash256,
        height: u64,
        bodies: Option<&[Transaction]>,
        verdict: BlockVerdict,
        applied: &mut usize,
    ) -> Result<u64, ShroudError> {
        let miner_id = block.miner_tx.txid()?;
        let mut block_size = block.miner_tx.blob_size()? as u64;
        state.add_transaction(miner_id, &block.miner_tx, height, 0)?;
        *applied = 1;

        let mut fees = 0u64;
        for (i, txid) in block.tx_hashes.iter().enumerate() {
            let position = i + 1;
            let tx = match bodies {
                Some(bodies) => bodies.get(i).cloned(),
                None => self.pool.lookup_transaction(txid),
            }
            .ok_or_else(|| BlockError::MissingTransaction(txid.to_string()))?;
            if tx.txid().map_err(|e| in_block(i)(e.into()))? != *txid {
                return Err(BlockError::MissingTransaction(txid.to_string()).into());
            }

            check_tx_semantics(&tx).map_err(|e| in_block(i)(e.into()))?;
            self.check_tx_inputs_with(state, &tx, !verdict.in_checkpoint_zone)
                .map_err(in_block(i))?;
            let fee = tx
                .fee()
                .ok_or_else(|| in_block(i)(TransactionError::ValueOverflow.into()))?;

            state
                .add_transaction(*txid, &tx, height, position as u32)
                .map_err(|e| match e {
                    ChainStateError::DuplicateTransaction(txid) => {
                        ShroudError::from(BlockError::DuplicateTransaction(txid))
                    }
                    other => other.into(),
                })?;
            *applied += 1;
            debug!(%txid, height, position, fee, "transaction applied");

            block_size += tx.blob_size().map_err(|e| in_block(i)(e.into()))? as u64;
            fees = fees
                .checked_add(fee)
                .ok_or_else(|| in_block(i)(TransactionError::ValueOverflow.into()))?;
        }

        if block_size > state.current_size_limit {
            return Err(BlockError::Oversized {
                size: block_size,
                limit: state.current_size_limit,
            }
            .into());
        }

        let median = util::median(state.index.last_block_sizes(REWARD_BLOCKS_WINDOW));
        let (generated, previous_difficulty) = state
            .index
            .tip_info()
            .map(|tip| (tip.already_generated_coins, tip.cumulative_difficulty))
            .unwrap_or((0, 0));
        let reward = validate_miner_transaction(block, block_size, median, generated, fees)?;

        let info = BlockExtendedInfo {
            block: block.clone(),
            height,
            block_cumulative_size: block_size,
            cumulative_difficulty: previous_difficulty.saturating_add(verdict.difficulty),
            already_generated_coins: generated.saturating_add(reward),
        };
        state.push_block(id, info)?;
        Ok(block_size)
    }
}
