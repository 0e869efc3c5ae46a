//! BLAKE3 Merkle tree over a block's transaction ids.
//!
//! Domain-separated hashing:
//! - Leaf hash: `BLAKE3(0x00 || txid)`
//! - Internal node: `BLAKE3(0x01 || left || right)`
//!
//! Odd-length layers are padded by duplicating the last element.
//! Empty input produces [`Hash256::ZERO`].

use crate::types::Hash256;

/// Domain separation prefix for leaf hashes.
const LEAF_PREFIX: u8 = 0x00;

/// Domain separation prefix for internal node hashes.
const NODE_PREFIX: u8 = 0x01;

/// Compute a domain-separated leaf hash: `BLAKE3(0x00 || data)`.
pub fn leaf_hash(data: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_PREFIX]);
    hasher.update(data.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute a domain-separated internal node hash: `BLAKE3(0x01 || left || right)`.
pub fn node_hash(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_PREFIX]);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute the Merkle root of `leaves`.
pub fn merkle_root(leaves: &[Hash256]) -> Hash256 {
    if leaves.is_empty() {
        return Hash256::ZERO;
    }

    let mut current: Vec<Hash256> = leaves.iter().map(leaf_hash).collect();
    while current.len() > 1 {
        current = current
            .chunks(2)
            .map(|pair| node_hash(&pair[0], &pair[pair.len() - 1]))
            .collect();
    }
    current[0]
}
