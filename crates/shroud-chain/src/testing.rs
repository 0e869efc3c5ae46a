//! Test doubles and chain builders shared by unit and integration tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream test crates.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use shroud_core::constants::{
    COIN, CURRENT_BLOCK_MAJOR_VERSION, CURRENT_BLOCK_MINOR_VERSION, CURRENT_TRANSACTION_VERSION,
    DIFFICULTY_TARGET, MINED_MONEY_UNLOCK_WINDOW,
};
use shroud_core::error::{ShroudError, TransactionError};
use shroud_core::genesis::{self, GENESIS_TIMESTAMP};
use shroud_core::traits::{TxPool, Verifier};
use shroud_core::types::{
    Block, BlockHeader, Hash256, KeyImage, PublicKey, Signature, Transaction, TxInput, TxOutput,
};
use shroud_core::util;

use crate::blockchain::Blockchain;
use crate::config::ChainConfig;

/// Wall clock used by [`TestChain`]: one year after genesis.
pub const TEST_NOW: u64 = GENESIS_TIMESTAMP + 365 * 86_400;

/// Signature element that [`MockVerifier`] refuses.
pub const BAD_SIGNATURE: [u8; 32] = [0xba; 32];

/// Verifier that accepts every proof of work unless told otherwise, and every
/// ring signature that has the right length and no [`BAD_SIGNATURE`] element.
#[derive(Default)]
pub struct MockVerifier {
    rejected: Mutex<HashSet<Hash256>>,
    pow_checks: AtomicUsize,
}

impl MockVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the proof-of-work check of block `id` from now on.
    pub fn reject_pow(&self, id: Hash256) {
        self.rejected.lock().insert(id);
    }

    /// Number of proof-of-work checks performed so far.
    pub fn pow_checks(&self) -> usize {
        self.pow_checks.load(Ordering::SeqCst)
    }
}

impl Verifier for MockVerifier {
    fn check_proof_of_work(&self, block: &Block, _difficulty: u64) -> bool {
        self.pow_checks.fetch_add(1, Ordering::SeqCst);
        let Ok(id) = block.hash() else {
            return false;
        };
        !self.rejected.lock().contains(&id)
    }

    fn check_ring_signature(
        &self,
        _prefix_hash: &Hash256,
        _key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        ring.len() == signatures.len() && signatures.iter().all(|s| s.c != BAD_SIGNATURE)
    }
}

/// In-memory transaction pool.
#[derive(Default)]
pub struct MemoryPool {
    txs: RwLock<HashMap<Hash256, Transaction>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, tx: Transaction) -> Result<Hash256, TransactionError> {
        let id = tx.txid()?;
        self.txs.write().insert(id, tx);
        Ok(id)
    }

    pub fn remove(&self, id: &Hash256) -> Option<Transaction> {
        self.txs.write().remove(id)
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.txs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }
}

impl TxPool for MemoryPool {
    fn lookup_transaction(&self, id: &Hash256) -> Option<Transaction> {
        self.txs.read().get(id).cloned()
    }

    fn notify_included(&self, id: &Hash256) {
        self.txs.write().remove(id);
    }

    fn notify_evicted(&self, id: &Hash256, tx: &Transaction) {
        self.txs.write().insert(*id, tx.clone());
    }
}

/// Deterministic output key for test transactions.
pub fn test_key(tag: &[u8]) -> PublicKey {
    PublicKey(blake3::hash(tag).into())
}

/// Coinbase for `height` paying `amount` to `key`.
pub fn coinbase(height: u64, amount: u64, key: PublicKey) -> Transaction {
    Transaction {
        version: CURRENT_TRANSACTION_VERSION,
        unlock_time: height + MINED_MONEY_UNLOCK_WINDOW,
        inputs: vec![TxInput::Gen { height }],
        outputs: vec![TxOutput { amount, key }],
        extra: Vec::new(),
        signatures: Vec::new(),
    }
}

/// One-input transaction spending `amount` with a ring over the absolute
/// global indexes `ring`. Signatures pass [`MockVerifier`].
pub fn ring_spend(amount: u64, ring: &[u64], key_image: KeyImage, outputs: Vec<TxOutput>) -> Transaction {
    Transaction {
        version: CURRENT_TRANSACTION_VERSION,
        unlock_time: 0,
        inputs: vec![TxInput::ToKey {
            amount,
            key_offsets: util::absolute_offsets_to_relative(ring),
            key_image,
        }],
        outputs,
        extra: Vec::new(),
        signatures: vec![vec![
            Signature {
                c: [1; 32],
                r: [2; 32],
            };
            ring.len()
        ]],
    }
}

/// Block at `height` on `prev` with a [`COIN`] coinbase. `nonce` feeds the
/// coinbase key so siblings at the same height differ.
pub fn make_block(prev: Hash256, height: u64, timestamp: u64, nonce: u32, tx_hashes: Vec<Hash256>) -> Block {
    let key = test_key(&[&height.to_le_bytes()[..], &nonce.to_le_bytes()[..]].concat());
    Block {
        header: BlockHeader {
            major_version: CURRENT_BLOCK_MAJOR_VERSION,
            minor_version: CURRENT_BLOCK_MINOR_VERSION,
            timestamp,
            prev_id: prev,
            nonce,
        },
        miner_tx: coinbase(height, COIN, key),
        tx_hashes,
    }
}

/// A chain over the mock collaborators, started from the real genesis block
/// with the clock fixed at [`TEST_NOW`].
pub struct TestChain {
    pub chain: Blockchain,
    pub verifier: Arc<MockVerifier>,
    pub pool: Arc<MemoryPool>,
}

impl TestChain {
    /// Chain with a data directory that is never written to.
    pub fn new() -> Result<Self, ShroudError> {
        Self::with_config(ChainConfig::with_data_dir("/nonexistent/shroud-test"))
    }

    pub fn with_config(config: ChainConfig) -> Result<Self, ShroudError> {
        Self::build(config, |chain| chain)
    }

    /// Chain customized by `configure` before genesis is installed.
    pub fn new_with(configure: impl FnOnce(Blockchain) -> Blockchain) -> Result<Self, ShroudError> {
        Self::build(ChainConfig::with_data_dir("/nonexistent/shroud-test"), configure)
    }

    fn build(
        config: ChainConfig,
        configure: impl FnOnce(Blockchain) -> Blockchain,
    ) -> Result<Self, ShroudError> {
        let verifier = Arc::new(MockVerifier::new());
        let pool = Arc::new(MemoryPool::new());
        let chain = Blockchain::new(config, verifier.clone(), pool.clone()).with_clock(|| TEST_NOW);
        let chain = configure(chain);
        chain.reset_and_set_genesis(genesis::genesis_block())?;
        Ok(Self {
            chain,
            verifier,
            pool,
        })
    }

    /// Block extending the current tip, carrying `txs`. The transactions are
    /// put in the pool so the block can be accepted.
    pub fn next_block(&self, txs: &[Transaction]) -> Block {
        let height = self.chain.height();
        self.build_on(self.chain.tail_id(), height, 0, txs)
    }

    /// Block at `height` on `prev`, one target interval per height after
    /// genesis plus `nonce` seconds.
    pub fn build_on(&self, prev: Hash256, height: u64, nonce: u32, txs: &[Transaction]) -> Block {
        let tx_hashes = txs
            .iter()
            .map(|tx| self.pool.add(tx.clone()).expect("test transaction encodes"))
            .collect();
        let timestamp = GENESIS_TIMESTAMP + height * DIFFICULTY_TARGET + u64::from(nonce);
        make_block(prev, height, timestamp, nonce, tx_hashes)
    }

    /// Extend the main chain by `count` empty blocks. Returns their ids.
    pub fn mine(&self, count: usize) -> Result<Vec<Hash256>, ShroudError> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let block = self.next_block(&[]);
            self.chain.submit_block(&block)?;
            ids.push(block.hash()?);
        }
        Ok(ids)
    }

    /// Mine until the coinbase of block 1 (global index 0 of amount [`COIN`])
    /// can be spent in the next block.
    pub fn mine_until_spendable(&self) -> Result<Vec<Hash256>, ShroudError> {
        let target = MINED_MONEY_UNLOCK_WINDOW + 1;
        let missing = target.saturating_sub(self.chain.height());
        self.mine(missing as usize)
    }
}
