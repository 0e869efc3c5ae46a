//! Read-side API.
//!
//! Every method takes the state read lock for its whole duration, so a
//! multi-step query never observes a block half applied.

use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use shroud_core::constants::{
    BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT, BLOCKS_SYNCHRONIZING_DEFAULT_COUNT,
    DEFAULT_TX_SPENDABLE_AGE, SHORT_CHAIN_HISTORY_DENSE,
};
use shroud_core::error::{ChainStateError, ShroudError};
use shroud_core::types::{Block, Hash256, KeyImage, PublicKey, Transaction};

use crate::blockchain::Blockchain;
use crate::output_index::{OutputEntry, RingMember};
use crate::state::ChainState;
use crate::validation::{check_tx_semantics, is_unlocked, resolve_ring};

/// A block with the bodies of its non-coinbase transactions, in block order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWithTransactions {
    pub block: Block,
    pub transactions: Vec<Transaction>,
}

/// Answer to a peer's request for blocks and transactions by id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetObjectsResponse {
    pub blocks: Vec<BlockWithTransactions>,
    pub transactions: Vec<Transaction>,
    pub missed_ids: Vec<Hash256>,
    pub current_height: u64,
    /// Some returned transaction had its signatures pruned.
    pub pruned: bool,
}

/// Main-chain ids a syncing peer is missing, starting at the last block it has.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSupplement {
    pub start_height: u64,
    pub total_height: u64,
    pub block_ids: Vec<Hash256>,
}

/// One decoy candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOut {
    pub global_index: u64,
    pub key: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomOuts {
    pub amount: u64,
    pub outs: Vec<RandomOut>,
}

/// Every block id the engine knows, by where it is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KnownBlockIds {
    pub main: Vec<Hash256>,
    pub alternative: Vec<Hash256>,
    pub invalid: Vec<Hash256>,
}

fn is_pruned(tx: &Transaction) -> bool {
    !tx.is_coinbase() && !tx.inputs.is_empty() && tx.signatures.is_empty()
}

fn block_with_transactions(
    state: &ChainState,
    block: &Block,
) -> Result<BlockWithTransactions, ChainStateError> {
    let transactions = block
        .tx_hashes
        .iter()
        .map(|txid| {
            state
                .transactions
                .get(txid)
                .map(|entry| entry.tx.clone())
                .ok_or_else(|| ChainStateError::TransactionNotFound(txid.to_string()))
        })
        .collect::<Result<_, _>>()?;
    Ok(BlockWithTransactions {
        block: block.clone(),
        transactions,
    })
}

/// Number of leading outputs old enough to be offered as decoys.
/// Main-chain blocks among `ids` with their bodies, plus the ids not found.
fn blocks_by_ids(
    state: &ChainState,
    ids: &[Hash256],
) -> Result<(Vec<BlockWithTransactions>, Vec<Hash256>), ChainStateError> {
    let mut blocks = Vec::new();
    let mut missed = Vec::new();
    for id in ids {
        match state.index.height_of(id).and_then(|h| state.index.block_at(h)) {
            Some(info) => blocks.push(block_with_transactions(state, &info.block)?),
            None => missed.push(*id),
        }
    }
    Ok((blocks, missed))
}

fn find_end_of_allowed_index(entries: &[OutputEntry], chain_height: u64) -> usize {
    entries
        .iter()
        .rposition(|e| u64::from(e.block_height) + DEFAULT_TX_SPENDABLE_AGE <= chain_height)
        .map_or(0, |i| i + 1)
}

impl Blockchain {
    // --- Chain ---

    /// Number of main-chain blocks.
    pub fn height(&self) -> u64 {
        self.state.read().chain_height()
    }

    pub fn tail_id(&self) -> Hash256 {
        self.state.read().tail_id()
    }

    pub fn block_id_by_height(&self, height: u64) -> Option<Hash256> {
        self.state.read().index.hash_at(height)
    }

    /// Main-chain height of `id`.
    pub fn block_height(&self, id: &Hash256) -> Option<u64> {
        self.state.read().index.height_of(id)
    }

    /// A main-chain or alternative block by id.
    pub fn block_by_hash(&self, id: &Hash256) -> Option<Block> {
        let state = self.state.read();
        state
            .index
            .height_of(id)
            .and_then(|h| state.index.block_at(h))
            .or_else(|| state.alternatives.get(id))
            .map(|info| info.block.clone())
    }

    /// Whether `id` is on the main chain, pooled, or known to be invalid.
    pub fn have_block(&self, id: &Hash256) -> bool {
        let state = self.state.read();
        state.index.contains(id) || state.alternatives.contains(id) || state.invalid.contains(id)
    }

    pub fn is_block_invalid(&self, id: &Hash256) -> bool {
        self.state.read().invalid.contains(id)
    }

    /// Difficulty of the main-chain block at `height`.
    pub fn block_difficulty(&self, height: u64) -> Option<u64> {
        let state = self.state.read();
        let current = state.index.block_at(height)?.cumulative_difficulty;
        let previous = match height {
            0 => 0,
            h => state.index.block_at(h - 1)?.cumulative_difficulty,
        };
        Some(current.saturating_sub(previous))
    }

    pub fn difficulty_for_next_block(&self) -> u64 {
        self.next_difficulty(&self.state.read())
    }

    /// Largest total size the next block may have.
    pub fn cumulative_size_limit(&self) -> u64 {
        self.state.read().current_size_limit
    }

    /// Sizes of up to `count` blocks ending at `from_height`, oldest first.
    pub fn backward_block_sizes(&self, from_height: u64, count: usize) -> Result<Vec<u64>, ShroudError> {
        let state = self.state.read();
        if from_height >= state.chain_height() {
            return Err(ChainStateError::BlockNotFound(format!("height {from_height}")).into());
        }
        let start = (from_height + 1).saturating_sub(count as u64);
        Ok((start..=from_height)
            .filter_map(|h| state.index.block_at(h))
            .map(|info| info.block_cumulative_size)
            .collect())
    }

    // --- Blocks ---

    /// Up to `count` main-chain blocks from `start` with their transactions.
    pub fn get_blocks(&self, start: u64, count: usize) -> Result<Vec<BlockWithTransactions>, ShroudError> {
        let state = self.state.read();
        let end = start.saturating_add(count as u64).min(state.chain_height());
        (start..end)
            .filter_map(|h| state.index.block_at(h))
            .map(|info| block_with_transactions(&state, &info.block).map_err(ShroudError::from))
            .collect()
    }

    /// Main-chain blocks by id. Unknown ids are returned as missed.
    pub fn get_blocks_by_ids(
        &self,
        ids: &[Hash256],
    ) -> Result<(Vec<BlockWithTransactions>, Vec<Hash256>), ShroudError> {
        Ok(blocks_by_ids(&self.state.read(), ids)?)
    }

    pub fn get_alternative_blocks(&self) -> Vec<Block> {
        self.state
            .read()
            .alternatives
            .iter()
            .map(|(_, info)| info.block.clone())
            .collect()
    }

    pub fn alternative_blocks_count(&self) -> usize {
        self.state.read().alternatives.len()
    }

    pub fn all_known_block_ids(&self) -> KnownBlockIds {
        let state = self.state.read();
        KnownBlockIds {
            main: (0..state.chain_height())
                .filter_map(|h| state.index.hash_at(h))
                .collect(),
            alternative: state.alternatives.iter().map(|(id, _)| *id).collect(),
            invalid: state.invalid.ids().copied().collect(),
        }
    }

    /// Blocks and transactions requested by a peer.
    pub fn handle_get_objects(
        &self,
        block_ids: &[Hash256],
        tx_ids: &[Hash256],
    ) -> Result<GetObjectsResponse, ShroudError> {
        let state = self.state.read();
        let (blocks, mut missed_ids) = blocks_by_ids(&state, block_ids)?;
        let (transactions, missed_txs) = self.transactions_in(&state, tx_ids);
        missed_ids.extend(missed_txs);
        let pruned = blocks
            .iter()
            .flat_map(|b| &b.transactions)
            .chain(&transactions)
            .any(is_pruned);
        Ok(GetObjectsResponse {
            blocks,
            transactions,
            missed_ids,
            current_height: state.chain_height(),
            pruned,
        })
    }

    // --- Transactions ---

    /// Transactions by id, from the chain or else from the pool.
    pub fn get_transactions(&self, ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        self.transactions_in(&self.state.read(), ids)
    }

    fn transactions_in(&self, state: &ChainState, ids: &[Hash256]) -> (Vec<Transaction>, Vec<Hash256>) {
        let mut found = Vec::new();
        let mut missed = Vec::new();
        for id in ids {
            let tx = state
                .transactions
                .get(id)
                .map(|entry| entry.tx.clone())
                .or_else(|| self.pool.lookup_transaction(id));
            match tx {
                Some(tx) => found.push(tx),
                None => missed.push(*id),
            }
        }
        (found, missed)
    }

    /// A confirmed transaction.
    pub fn get_tx(&self, id: &Hash256) -> Option<Transaction> {
        self.state.read().transactions.get(id).map(|entry| entry.tx.clone())
    }

    pub fn have_tx(&self, id: &Hash256) -> bool {
        self.state.read().transactions.contains(id)
    }

    pub fn total_transactions(&self) -> usize {
        self.state.read().transactions.len()
    }

    pub fn is_key_image_spent(&self, image: &KeyImage) -> bool {
        self.state.read().spent.is_spent(image)
    }

    /// Whether any key image of `tx` is already spent on the main chain.
    pub fn have_tx_key_images_as_spent(&self, tx: &Transaction) -> bool {
        let state = self.state.read();
        tx.key_images().any(|image| state.spent.is_spent(image))
    }

    /// Global output indexes assigned to the outputs of `txid`.
    pub fn tx_output_global_indexes(&self, txid: &Hash256) -> Option<Vec<u64>> {
        self.state
            .read()
            .transactions
            .get(txid)
            .map(|entry| entry.global_output_indexes.clone())
    }

    /// Check `tx` against the current tip for pool admission. Returns the
    /// highest block height any of its ring members comes from.
    pub fn check_tx_inputs(&self, tx: &Transaction) -> Result<u64, ShroudError> {
        check_tx_semantics(tx)?;
        let state = self.state.read();
        self.check_tx_inputs_with(&state, tx, true)
    }

    // --- Outputs ---

    /// The output index sequence of `amount`.
    pub fn get_outs(&self, amount: u64) -> Vec<OutputEntry> {
        self.state.read().outputs.entries(amount).to_vec()
    }

    /// Resolve absolute global indexes of `amount` to their outputs, with the
    /// highest block height among them.
    pub fn resolve_ring_members(
        &self,
        amount: u64,
        absolute_offsets: &[u64],
    ) -> Result<(Vec<RingMember>, u64), ShroudError> {
        let state = self.state.read();
        let members = resolve_ring(&state, amount, absolute_offsets)?;
        let max_height = members.iter().map(|m| m.block_height).max().unwrap_or(0);
        Ok((members, max_height))
    }

    /// Up to `count` distinct unlocked decoys per amount.
    ///
    /// Only outputs at least [`DEFAULT_TX_SPENDABLE_AGE`] blocks deep are
    /// offered. When more are available than requested, picks follow a
    /// square-root distribution over the index range, which favors recent
    /// outputs.
    pub fn random_outs_for_amounts(&self, amounts: &[u64], count: usize) -> Vec<RandomOuts> {
        let state = self.state.read();
        let chain_height = state.chain_height();
        let now = self.now();
        let mut rng = rand::thread_rng();

        amounts
            .iter()
            .map(|&amount| {
                let entries = state.outputs.entries(amount);
                let allowed = find_end_of_allowed_index(entries, chain_height);
                let pick = |global_index: u64| -> Option<RandomOut> {
                    let member = state.resolve_output(amount, global_index).ok()?;
                    is_unlocked(member.unlock_time, chain_height, now).then_some(RandomOut {
                        global_index,
                        key: member.key,
                    })
                };

                let outs = if allowed <= count {
                    (0..allowed as u64).filter_map(pick).collect()
                } else {
                    let mut used = HashSet::new();
                    let mut outs = Vec::with_capacity(count);
                    let mut tries = 0;
                    while outs.len() < count && tries < allowed {
                        tries += 1;
                        let r = rng.r#gen::<f64>();
                        let index = ((r.sqrt() * allowed as f64) as u64).min(allowed as u64 - 1);
                        if !used.insert(index) {
                            continue;
                        }
                        if let Some(out) = pick(index) {
                            outs.push(out);
                        }
                    }
                    outs
                };
                RandomOuts { amount, outs }
            })
            .collect()
    }

    // --- Sync ---

    /// Ids a peer can use to find the common block: the ten most recent,
    /// then with gaps doubling, genesis last.
    pub fn short_chain_history(&self) -> Vec<Hash256> {
        let state = self.state.read();
        let len = state.chain_height();
        let mut ids = Vec::new();
        if len == 0 {
            return ids;
        }
        let mut back = 1u64;
        let mut step = 1u64;
        let mut i = 0;
        while back < len {
            ids.extend(state.index.hash_at(len - back));
            if i < SHORT_CHAIN_HISTORY_DENSE {
                back += 1;
            } else {
                step *= 2;
                back += step;
            }
            i += 1;
        }
        ids.extend(state.index.hash_at(0));
        ids
    }

    /// Height of the newest block in `known` that is on the main chain.
    fn find_common_height(state: &ChainState, known: &[Hash256]) -> Result<u64, ShroudError> {
        let genesis = state.index.hash_at(0);
        if known.last().copied() != genesis {
            return Err(ShroudError::UnknownHistory(
                "history does not end at our genesis".into(),
            ));
        }
        known
            .iter()
            .find_map(|id| state.index.height_of(id))
            .ok_or_else(|| ShroudError::UnknownHistory("no common block".into()))
    }

    /// Main-chain ids from the common block on.
    pub fn find_supplement_ids(&self, known: &[Hash256]) -> Result<ChainSupplement, ShroudError> {
        let state = self.state.read();
        let start_height = Self::find_common_height(&state, known)?;
        let total_height = state.chain_height();
        let end = start_height
            .saturating_add(BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT as u64)
            .min(total_height);
        Ok(ChainSupplement {
            start_height,
            total_height,
            block_ids: (start_height..end)
                .filter_map(|h| state.index.hash_at(h))
                .collect(),
        })
    }

    /// Main-chain blocks after the common block, with their transactions.
    pub fn find_supplement(&self, known: &[Hash256]) -> Result<Vec<BlockWithTransactions>, ShroudError> {
        let state = self.state.read();
        let start = Self::find_common_height(&state, known)? + 1;
        let end = start
            .saturating_add(BLOCKS_SYNCHRONIZING_DEFAULT_COUNT as u64)
            .min(state.chain_height());
        (start..end)
            .filter_map(|h| state.index.block_at(h))
            .map(|info| block_with_transactions(&state, &info.block).map_err(ShroudError::from))
            .collect()
    }

    // --- Diagnostics ---

    /// Digest of the main chain and its indexes. Equal digests mean equal
    /// chain state.
    pub fn state_digest(&self) -> Result<Hash256, ShroudError> {
        self.state.read().digest()
    }

    /// Log main-chain blocks in `[start, end)`.
    pub fn print_blockchain(&self, start: u64, end: u64) {
        let state = self.state.read();
        for info in (start..end.min(state.chain_height())).filter_map(|h| state.index.block_at(h)) {
            let id = state.index.hash_at(info.height).unwrap_or_default();
            info!(
                height = info.height,
                %id,
                timestamp = info.block.header.timestamp,
                cumulative_difficulty = info.cumulative_difficulty,
                size = info.block_cumulative_size,
                generated = info.already_generated_coins,
                txs = info.block.tx_hashes.len(),
                "block"
            );
        }
    }

    /// Log the id -> height index.
    pub fn print_blockchain_index(&self) {
        let state = self.state.read();
        for height in 0..state.chain_height() {
            if let Some(id) = state.index.hash_at(height) {
                info!(height, %id, "index entry");
            }
        }
    }
}
