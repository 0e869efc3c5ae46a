//! Shared helpers for the integration suites.

use std::path::Path;
use std::sync::Arc;

use shroud_chain::testing::{ring_spend, TestChain, TEST_NOW};
use shroud_chain::{Blockchain, ChainConfig};
use shroud_core::constants::COIN;
use shroud_core::error::ShroudError;
use shroud_core::traits::CheckpointSource;
use shroud_core::types::{Hash256, KeyImage, PublicKey, Transaction, TxOutput};
use tracing_subscriber::EnvFilter;

/// Install a test log subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spend of one [`COIN`] output with a ring over the absolute indexes `ring`,
/// paying `fee`.
pub fn spend_coin(image: u8, ring: &[u64], fee: u64) -> Transaction {
    ring_spend(
        COIN,
        ring,
        KeyImage([image; 32]),
        vec![TxOutput {
            amount: COIN - fee,
            key: PublicKey([image; 32]),
        }],
    )
}

/// A chain whose first [`COIN`] coinbase output is spendable in the next block.
pub fn spendable_chain() -> Result<TestChain, ShroudError> {
    init_tracing();
    let t = TestChain::new()?;
    t.mine_until_spendable()?;
    Ok(t)
}

/// A chain persisting under `dir`.
pub fn chain_in(dir: &Path) -> Result<TestChain, ShroudError> {
    init_tracing();
    TestChain::with_config(ChainConfig::with_data_dir(dir))
}

/// A second engine over the same collaborators and data directory as `t`,
/// not yet initialized.
pub fn reopen(t: &TestChain) -> Blockchain {
    Blockchain::new(t.chain.config().clone(), t.verifier.clone(), t.pool.clone())
        .with_clock(|| TEST_NOW)
}

/// Submit `count` blocks on `prev` starting at `height`, each with `nonce`.
/// Returns the ids in order; stops at the first rejection.
pub fn submit_branch(
    t: &TestChain,
    prev: Hash256,
    height: u64,
    count: usize,
    nonce: u32,
) -> Result<Vec<Hash256>, ShroudError> {
    let mut ids = Vec::with_capacity(count);
    let mut parent = prev;
    for offset in 0..count as u64 {
        let block = t.build_on(parent, height + offset, nonce, &[]);
        t.chain.submit_block(&block)?;
        parent = block.hash()?;
        ids.push(parent);
    }
    Ok(ids)
}

/// Checkpoints as the trait object [`Blockchain::with_checkpoints`] takes.
pub fn shared<T: CheckpointSource + 'static>(source: T) -> Arc<dyn CheckpointSource> {
    Arc::new(source)
}
