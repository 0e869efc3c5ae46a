//! The single owner of every chain container.
//!
//! [`ChainState`] is the only place where the chain index, output index,
//! spent set and transaction store are mutated. Each mutation method applies
//! or undoes the full effect of one transaction or one block, so callers
//! holding the write lock never see one container ahead of another.

use shroud_core::constants::REWARD_BLOCKS_WINDOW;
use shroud_core::error::{ChainStateError, PersistenceError, ShroudError};
use shroud_core::reward;
use shroud_core::types::{Hash256, Transaction};
use shroud_core::util;

use crate::alt_chain::AlternativeChains;
use crate::chain_index::{BlockExtendedInfo, ChainIndex};
use crate::invalid::InvalidBlockCache;
use crate::output_index::{OutputEntry, OutputIndex, RingMember};
use crate::spent_set::SpentKeyImages;
use crate::tx_store::{TransactionChainEntry, TransactionStore};

/// A main-chain block removed from the tip, with the bodies of its
/// non-coinbase transactions in block order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PoppedBlock {
    pub id: Hash256,
    pub info: BlockExtendedInfo,
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChainState {
    pub(crate) index: ChainIndex,
    pub(crate) outputs: OutputIndex,
    pub(crate) spent: SpentKeyImages,
    pub(crate) transactions: TransactionStore,
    pub(crate) alternatives: AlternativeChains,
    pub(crate) invalid: InvalidBlockCache,
    /// Largest cumulative block size the next block may have.
    pub(crate) current_size_limit: u64,
}

impl ChainState {
    pub(crate) fn new(invalid_capacity: usize) -> Self {
        Self {
            index: ChainIndex::new(),
            outputs: OutputIndex::new(),
            spent: SpentKeyImages::new(),
            transactions: TransactionStore::new(),
            alternatives: AlternativeChains::new(),
            invalid: InvalidBlockCache::new(invalid_capacity),
            current_size_limit: reward::max_block_size(0),
        }
    }

    /// Drop every block, transaction, output and key image. The invalid-block
    /// cache survives so known-bad blocks stay rejected.
    pub(crate) fn clear(&mut self) {
        self.index.clear();
        self.outputs.clear();
        self.spent.clear();
        self.transactions.clear();
        self.alternatives.clear();
        self.update_size_limit();
    }

    /// Number of main-chain blocks.
    pub(crate) fn chain_height(&self) -> u64 {
        self.index.len()
    }

    /// Id of the main-chain tip, or zero for an empty chain.
    pub(crate) fn tail_id(&self) -> Hash256 {
        self.index.tip().map(|(_, id)| id).unwrap_or(Hash256::ZERO)
    }

    /// Record `tx` as included at `position` of the block at `height`: mark
    /// its key images, append its outputs and store the entry.
    ///
    /// Leaves the state unchanged on error.
    pub(crate) fn add_transaction(
        &mut self,
        txid: Hash256,
        tx: &Transaction,
        height: u64,
        position: u32,
    ) -> Result<(), ChainStateError> {
        if self.transactions.contains(&txid) {
            return Err(ChainStateError::DuplicateTransaction(txid.to_string()));
        }
        let block_height =
            u32::try_from(height).map_err(|_| ChainStateError::HeightOverflow(height))?;

        let mut marked = Vec::with_capacity(tx.inputs.len());
        for image in tx.key_images() {
            if let Err(e) = self.spent.mark_spent(*image) {
                for done in &marked {
                    self.spent.unmark(done);
                }
                return Err(e);
            }
            marked.push(*image);
        }

        let global_output_indexes = tx
            .outputs
            .iter()
            .enumerate()
            .map(|(i, out)| {
                let entry = OutputEntry {
                    block_height,
                    tx_in_block: position,
                    output_in_tx: i as u32,
                };
                self.outputs.append(out.amount, entry)
            })
            .collect();

        self.transactions.insert(
            txid,
            TransactionChainEntry {
                tx: tx.clone(),
                keeper_block_height: height,
                global_output_indexes,
            },
        )
    }

    /// Undo [`add_transaction`](Self::add_transaction) for the transaction at
    /// `position` of its keeper block. Its outputs must be the tails of their
    /// amount sequences.
    pub(crate) fn purge_transaction(
        &mut self,
        txid: &Hash256,
        position: u32,
    ) -> Result<Transaction, ChainStateError> {
        let entry = self
            .transactions
            .remove(txid)
            .ok_or_else(|| ChainStateError::TransactionNotFound(txid.to_string()))?;
        let height = entry.keeper_block_height;
        let block_height =
            u32::try_from(height).map_err(|_| ChainStateError::HeightOverflow(height))?;

        for (i, out) in entry.tx.outputs.iter().enumerate().rev() {
            let expected = OutputEntry {
                block_height,
                tx_in_block: position,
                output_in_tx: i as u32,
            };
            self.outputs.pop_expected(out.amount, expected)?;
        }
        for image in entry.tx.key_images() {
            if !self.spent.unmark(image) {
                return Err(ChainStateError::NotSpent(image.to_string()));
            }
        }
        Ok(entry.tx)
    }

    /// Undo every transaction of `block` that was applied, newest first.
    ///
    /// `applied` counts applied transactions in block order, the miner
    /// transaction first.
    pub(crate) fn purge_block_data(
        &mut self,
        info: &BlockExtendedInfo,
        applied: usize,
    ) -> Result<Vec<Transaction>, ShroudError> {
        let block = &info.block;
        let mut bodies = Vec::with_capacity(applied.saturating_sub(1));
        for position in (1..applied).rev() {
            let txid = block
                .tx_hashes
                .get(position - 1)
                .ok_or(ChainStateError::TxPositionOutOfRange {
                    height: info.height,
                    position: position as u32,
                })?;
            bodies.push(self.purge_transaction(txid, position as u32)?);
        }
        if applied > 0 {
            let miner_id = block.miner_tx.txid()?;
            self.purge_transaction(&miner_id, 0)?;
        }
        bodies.reverse();
        Ok(bodies)
    }

    /// Append a fully applied block to the main chain.
    pub(crate) fn push_block(
        &mut self,
        id: Hash256,
        info: BlockExtendedInfo,
    ) -> Result<u64, ChainStateError> {
        let height = self.index.push(id, info)?;
        self.update_size_limit();
        Ok(height)
    }

    /// Remove the tip and undo all of its transactions.
    pub(crate) fn pop_block(&mut self) -> Result<PoppedBlock, ShroudError> {
        let (id, info) = self.index.pop().ok_or(ChainStateError::EmptyChain)?;
        let applied = info.block.tx_hashes.len() + 1;
        let transactions = self.purge_block_data(&info, applied)?;
        self.update_size_limit();
        Ok(PoppedBlock {
            id,
            info,
            transactions,
        })
    }

    /// Twice the floored median of the recent block sizes.
    pub(crate) fn update_size_limit(&mut self) {
        let median = util::median(self.index.last_block_sizes(REWARD_BLOCKS_WINDOW));
        self.current_size_limit = reward::max_block_size(median);
    }

    /// Follow an output index entry back to its transaction and output.
    pub(crate) fn resolve_output(
        &self,
        amount: u64,
        global_index: u64,
    ) -> Result<RingMember, ShroudError> {
        let entry = self.outputs.lookup(amount, global_index)?;
        let height = u64::from(entry.block_height);
        let info = self
            .index
            .block_at(height)
            .ok_or_else(|| ChainStateError::BlockNotFound(format!("height {height}")))?;

        let txid = match entry.tx_in_block {
            0 => info.block.miner_tx.txid()?,
            position => *info
                .block
                .tx_hashes
                .get(position as usize - 1)
                .ok_or(ChainStateError::TxPositionOutOfRange { height, position })?,
        };
        let tx_entry = self
            .transactions
            .get(&txid)
            .ok_or_else(|| ChainStateError::TransactionNotFound(txid.to_string()))?;
        let output = tx_entry
            .tx
            .outputs
            .get(entry.output_in_tx as usize)
            .ok_or_else(|| ChainStateError::OutputMissing {
                txid: txid.to_string(),
                index: entry.output_in_tx,
            })?;

        Ok(RingMember {
            txid,
            output_index: entry.output_in_tx,
            key: output.key,
            block_height: height,
            unlock_time: tx_entry.tx.unlock_time,
        })
    }

    /// BLAKE3 over a canonical encoding of the main chain, transactions,
    /// spent set, output index and size limit. Alternative blocks and the
    /// invalid cache are not part of it.
    pub(crate) fn digest(&self) -> Result<Hash256, ShroudError> {
        let ids: Vec<Hash256> = (0..self.index.len())
            .filter_map(|h| self.index.hash_at(h))
            .collect();
        let mut transactions: Vec<_> = self.transactions.as_map().iter().collect();
        transactions.sort_unstable_by_key(|(id, _)| **id);
        let mut spent: Vec<_> = self.spent.as_set().iter().collect();
        spent.sort_unstable();

        let canonical = (
            ids,
            self.index.blocks(),
            transactions,
            spent,
            self.outputs.as_map(),
            self.current_size_limit,
        );
        let bytes = bincode::encode_to_vec(canonical, bincode::config::standard())
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        Ok(Hash256(blake3::hash(&bytes).into()))
    }
}
