//! Genesis block definition.
//!
//! The genesis block (height 0) carries a single coinbase paying the full
//! base reward of an empty chain. It goes through the normal acceptance path,
//! so it must satisfy the same miner-transaction rules as any other block.
//!
//! All values are hardcoded and deterministic; every node computes the
//! identical genesis block.

use std::sync::LazyLock;

use crate::constants::{
    CURRENT_BLOCK_MAJOR_VERSION, CURRENT_BLOCK_MINOR_VERSION, CURRENT_TRANSACTION_VERSION,
    MINED_MONEY_UNLOCK_WINDOW,
};
use crate::reward;
use crate::types::{Block, BlockHeader, Hash256, PublicKey, Transaction, TxInput, TxOutput};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Tag stored in the genesis coinbase extra field.
pub const GENESIS_MESSAGE: &[u8] = b"shroud genesis: every ring hides one.";

/// Cached genesis data, computed once on first access.
struct GenesisData {
    block: Block,
    hash: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

fn build_genesis() -> GenesisData {
    let block = Block {
        header: BlockHeader {
            major_version: CURRENT_BLOCK_MAJOR_VERSION,
            minor_version: CURRENT_BLOCK_MINOR_VERSION,
            timestamp: GENESIS_TIMESTAMP,
            prev_id: Hash256::ZERO,
            nonce: 70,
        },
        miner_tx: genesis_coinbase(),
        tx_hashes: Vec::new(),
    };
    // Hardcoded fields only; encoding cannot fail.
    let hash = block.hash().unwrap_or_default();
    GenesisData { block, hash }
}

fn genesis_coinbase() -> Transaction {
    Transaction {
        version: CURRENT_TRANSACTION_VERSION,
        unlock_time: MINED_MONEY_UNLOCK_WINDOW,
        inputs: vec![TxInput::Gen { height: 0 }],
        outputs: vec![TxOutput {
            amount: reward::base_reward(0),
            key: genesis_output_key(),
        }],
        extra: GENESIS_MESSAGE.to_vec(),
        signatures: Vec::new(),
    }
}

/// Output key of the genesis coinbase, `BLAKE3(b"shroud genesis output")`.
pub fn genesis_output_key() -> PublicKey {
    PublicKey(blake3::hash(b"shroud genesis output").into())
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block id.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_block_deterministic() {
        assert_eq!(genesis_block(), genesis_block());
        assert_eq!(genesis_hash(), genesis_block().hash().unwrap());
        assert!(!genesis_hash().is_zero());
    }

    #[test]
    fn genesis_has_zero_parent() {
        assert!(genesis_block().header.prev_id.is_zero());
        assert!(genesis_block().tx_hashes.is_empty());
    }

    #[test]
    fn genesis_coinbase_is_height_zero() {
        let block = genesis_block();
        assert!(block.miner_tx.is_coinbase());
        assert_eq!(block.height(), Some(0));
        assert_eq!(block.miner_tx.unlock_time, MINED_MONEY_UNLOCK_WINDOW);
    }

    #[test]
    fn genesis_pays_exactly_the_base_reward() {
        let paid = genesis_block().miner_tx.total_output_amount().unwrap();
        assert_eq!(paid, reward::base_reward(0));
    }
}
