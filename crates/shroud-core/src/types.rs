//! Core protocol types: keys, transactions and blocks.
//!
//! Amounts are in atomic units (1 SHR = 10^12 units). Outputs are grouped by
//! amount ("denomination"); ring inputs reference other outputs of the same
//! amount by their global index within that denomination.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::TransactionError;
use crate::merkle;

/// A 32-byte hash value.
///
/// Used for transaction ids (BLAKE3), block ids (double SHA-256) and merkle
/// roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash. Genesis uses it as its previous block id.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// One-time output public key.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct PublicKey(pub [u8; 32]);

/// Key image: the linkable tag a spend reveals for the output it consumes.
///
/// Two spends of the same output always produce the same key image, which is
/// what the spent set keys on.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct KeyImage(pub [u8; 32]);

impl fmt::Display for KeyImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A single ring-signature element, one per ring member.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

/// A transaction input.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum TxInput {
    /// Coinbase input. Carries the height of the block that mints it.
    Gen { height: u64 },
    /// Ring input spending one of the referenced outputs of `amount`.
    ToKey {
        /// Denomination of every ring member.
        amount: u64,
        /// Ring member global indexes, relative-encoded (first absolute,
        /// then deltas).
        key_offsets: Vec<u64>,
        /// Key image of the real output being spent.
        key_image: KeyImage,
    },
}

impl TxInput {
    /// Amount spent by this input. Coinbase inputs spend nothing.
    pub fn amount(&self) -> u64 {
        match self {
            TxInput::Gen { .. } => 0,
            TxInput::ToKey { amount, .. } => *amount,
        }
    }

    /// Key image of a ring input.
    pub fn key_image(&self) -> Option<&KeyImage> {
        match self {
            TxInput::Gen { .. } => None,
            TxInput::ToKey { key_image, .. } => Some(key_image),
        }
    }
}

/// A transaction output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Denomination in atomic units.
    pub amount: u64,
    /// One-time destination key.
    pub key: PublicKey,
}

/// A transaction.
///
/// The prefix (every field except `signatures`) is what the id commits to.
/// Signatures are the prunable part: one list per input, one signature per
/// ring member.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Block height (below `MAX_BLOCK_NUMBER`) or unix time before which the
    /// outputs cannot be spent.
    pub unlock_time: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    /// Free-form bytes (tx public key, nonces).
    pub extra: Vec<u8>,
    pub signatures: Vec<Vec<Signature>>,
}

impl Transaction {
    /// Compute the transaction id: BLAKE3 of the canonical prefix encoding.
    pub fn txid(&self) -> Result<Hash256, TransactionError> {
        let prefix = (
            self.version,
            self.unlock_time,
            &self.inputs,
            &self.outputs,
            &self.extra,
        );
        let encoded = bincode::encode_to_vec(prefix, bincode::config::standard())
            .map_err(|e| TransactionError::Serialization(e.to_string()))?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// Size of the full encoding in bytes, signatures included.
    pub fn blob_size(&self) -> Result<usize, TransactionError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map(|bytes| bytes.len())
            .map_err(|e| TransactionError::Serialization(e.to_string()))
    }

    /// Coinbase transactions have exactly one `Gen` input.
    pub fn is_coinbase(&self) -> bool {
        matches!(self.inputs.as_slice(), [TxInput::Gen { .. }])
    }

    /// Sum of all output amounts. Returns None on overflow.
    pub fn total_output_amount(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// Sum of all input amounts. Returns None on overflow.
    pub fn total_input_amount(&self) -> Option<u64> {
        self.inputs
            .iter()
            .try_fold(0u64, |acc, input| acc.checked_add(input.amount()))
    }

    /// Inputs minus outputs. None if outputs exceed inputs or on overflow.
    pub fn fee(&self) -> Option<u64> {
        self.total_input_amount()?
            .checked_sub(self.total_output_amount()?)
    }

    /// Key images of every ring input, in input order.
    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.inputs.iter().filter_map(TxInput::key_image)
    }
}

/// Block header.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    pub major_version: u8,
    pub minor_version: u8,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Id of the parent block. Zero for genesis.
    pub prev_id: Hash256,
    /// Proof-of-work nonce.
    pub nonce: u32,
}

/// A block: header, miner transaction and the ids of included transactions.
///
/// Transaction bodies travel separately and are resolved against the mempool
/// when the block is accepted.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    pub header: BlockHeader,
    pub miner_tx: Transaction,
    pub tx_hashes: Vec<Hash256>,
}

impl Block {
    /// Hashing input size: versions, timestamp, prev id, nonce, tree root, count.
    const HASHING_SIZE: usize = 2 + 8 + 32 + 4 + 32 + 8;

    /// Merkle root over `[miner_tx_id, tx_hashes...]`.
    pub fn tree_root(&self) -> Result<Hash256, TransactionError> {
        let mut leaves = Vec::with_capacity(self.tx_hashes.len() + 1);
        leaves.push(self.miner_tx.txid()?);
        leaves.extend_from_slice(&self.tx_hashes);
        Ok(merkle::merkle_root(&leaves))
    }

    /// Compute the block id (double SHA-256).
    ///
    /// Fixed little-endian layout: major || minor || timestamp || prev_id ||
    /// nonce || tree_root || transaction count (miner tx included).
    pub fn hash(&self) -> Result<Hash256, TransactionError> {
        let mut data = Vec::with_capacity(Self::HASHING_SIZE);
        data.push(self.header.major_version);
        data.push(self.header.minor_version);
        data.extend_from_slice(&self.header.timestamp.to_le_bytes());
        data.extend_from_slice(self.header.prev_id.as_bytes());
        data.extend_from_slice(&self.header.nonce.to_le_bytes());
        data.extend_from_slice(self.tree_root()?.as_bytes());
        data.extend_from_slice(&(self.tx_hashes.len() as u64 + 1).to_le_bytes());
        let first = Sha256::digest(&data);
        Ok(Hash256(Sha256::digest(first).into()))
    }

    /// Height claimed by the coinbase input, if the miner tx is well formed.
    pub fn height(&self) -> Option<u64> {
        match self.miner_tx.inputs.as_slice() {
            [TxInput::Gen { height }] => Some(*height),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            unlock_time: 0,
            inputs: vec![TxInput::ToKey {
                amount: 5 * COIN,
                key_offsets: vec![3, 1],
                key_image: KeyImage([0x11; 32]),
            }],
            outputs: vec![TxOutput {
                amount: 4 * COIN,
                key: PublicKey([0x22; 32]),
            }],
            extra: vec![],
            signatures: vec![vec![Signature::default(); 2]],
        }
    }

    fn sample_coinbase(height: u64) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: height + 60,
            inputs: vec![TxInput::Gen { height }],
            outputs: vec![TxOutput {
                amount: 10 * COIN,
                key: PublicKey([0x33; 32]),
            }],
            extra: vec![],
            signatures: vec![],
        }
    }

    fn sample_block() -> Block {
        Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                timestamp: 1_700_000_000,
                prev_id: Hash256([0xAA; 32]),
                nonce: 7,
            },
            miner_tx: sample_coinbase(12),
            tx_hashes: vec![sample_tx().txid().unwrap()],
        }
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert!(!Hash256([1; 32]).is_zero());
    }

    #[test]
    fn hash256_display_hex() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        bytes[31] = 0x01;
        let s = Hash256(bytes).to_string();
        assert_eq!(s.len(), 64);
        assert!(s.starts_with("ab"));
        assert!(s.ends_with("01"));
    }

    // --- Transactions ---

    #[test]
    fn coinbase_detection() {
        assert!(sample_coinbase(1).is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn two_gen_inputs_not_coinbase() {
        let mut tx = sample_coinbase(1);
        tx.inputs.push(TxInput::Gen { height: 1 });
        assert!(!tx.is_coinbase());
    }

    #[test]
    fn fee_is_inputs_minus_outputs() {
        assert_eq!(sample_tx().fee(), Some(COIN));
    }

    #[test]
    fn fee_none_when_outputs_exceed_inputs() {
        let mut tx = sample_tx();
        tx.outputs[0].amount = 6 * COIN;
        assert_eq!(tx.fee(), None);
    }

    #[test]
    fn total_output_amount_overflow_returns_none() {
        let mut tx = sample_tx();
        tx.outputs.push(TxOutput {
            amount: u64::MAX,
            key: PublicKey::default(),
        });
        assert_eq!(tx.total_output_amount(), None);
    }

    #[test]
    fn txid_ignores_signatures() {
        let tx = sample_tx();
        let mut pruned = tx.clone();
        pruned.signatures.clear();
        assert_eq!(tx.txid().unwrap(), pruned.txid().unwrap());
        assert!(pruned.blob_size().unwrap() < tx.blob_size().unwrap());
    }

    #[test]
    fn txid_changes_with_prefix() {
        let tx = sample_tx();
        let mut other = tx.clone();
        other.unlock_time = 1;
        assert_ne!(tx.txid().unwrap(), other.txid().unwrap());
    }

    #[test]
    fn key_images_skip_gen_inputs() {
        assert_eq!(sample_coinbase(3).key_images().count(), 0);
        let tx = sample_tx();
        let images: Vec<_> = tx.key_images().collect();
        assert_eq!(images, vec![&KeyImage([0x11; 32])]);
    }

    // --- Blocks ---

    #[test]
    fn block_hash_deterministic() {
        let block = sample_block();
        assert_eq!(block.hash().unwrap(), block.hash().unwrap());
        assert!(!block.hash().unwrap().is_zero());
    }

    #[test]
    fn block_hash_changes_with_nonce() {
        let block = sample_block();
        let mut other = block.clone();
        other.header.nonce += 1;
        assert_ne!(block.hash().unwrap(), other.hash().unwrap());
    }

    #[test]
    fn block_hash_commits_to_tx_hashes() {
        let block = sample_block();
        let mut other = block.clone();
        other.tx_hashes.push(Hash256([9; 32]));
        assert_ne!(block.hash().unwrap(), other.hash().unwrap());
    }

    #[test]
    fn block_height_from_coinbase() {
        assert_eq!(sample_block().height(), Some(12));
        let mut block = sample_block();
        block.miner_tx = sample_tx();
        assert_eq!(block.height(), None);
    }
}
