//! Criterion benchmarks for shroud-core hot paths.
//!
//! Covers: Merkle root construction, block id hashing, difficulty retarget
//! over a full window, and transaction id computation.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use shroud_core::constants::{DIFFICULTY_BLOCKS_COUNT, DIFFICULTY_TARGET};
use shroud_core::difficulty::next_difficulty;
use shroud_core::genesis::genesis_block;
use shroud_core::merkle::merkle_root;
use shroud_core::types::{Hash256, KeyImage, PublicKey, Signature, Transaction, TxInput, TxOutput};

/// Generate `n` deterministic 32-byte hashes for Merkle benchmarks.
fn make_txids(n: usize) -> Vec<Hash256> {
    (0..n)
        .map(|i| {
            let bytes = blake3::hash(&(i as u64).to_le_bytes());
            Hash256(*bytes.as_bytes())
        })
        .collect()
}

fn sample_transaction() -> Transaction {
    Transaction {
        version: 1,
        unlock_time: 0,
        inputs: vec![TxInput::ToKey {
            amount: 1_000,
            key_offsets: vec![4, 9, 1, 30, 2, 7, 11],
            key_image: KeyImage([0x11; 32]),
        }],
        outputs: vec![
            TxOutput {
                amount: 600,
                key: PublicKey([0xCC; 32]),
            },
            TxOutput {
                amount: 300,
                key: PublicKey([0xDD; 32]),
            },
        ],
        extra: vec![0x01; 33],
        signatures: vec![vec![Signature::default(); 7]],
    }
}

fn bench_merkle_root(c: &mut Criterion) {
    let txids_10 = make_txids(10);
    let txids_1000 = make_txids(1000);

    c.bench_function("merkle_root_10_txids", |b| {
        b.iter(|| merkle_root(black_box(&txids_10)))
    });

    c.bench_function("merkle_root_1000_txids", |b| {
        b.iter(|| merkle_root(black_box(&txids_1000)))
    });
}

fn bench_block_id(c: &mut Criterion) {
    let block = genesis_block().clone();

    c.bench_function("block_id", |b| b.iter(|| black_box(&block).hash()));
}

fn bench_next_difficulty(c: &mut Criterion) {
    let timestamps: Vec<u64> = (0..DIFFICULTY_BLOCKS_COUNT as u64)
        .map(|i| 1_700_000_000 + i * DIFFICULTY_TARGET)
        .collect();
    let cumulative: Vec<u64> = (1..=DIFFICULTY_BLOCKS_COUNT as u64)
        .map(|i| i * 50_000)
        .collect();

    c.bench_function("next_difficulty_full_window", |b| {
        b.iter(|| next_difficulty(black_box(&timestamps), black_box(&cumulative)))
    });
}

fn bench_txid(c: &mut Criterion) {
    let tx = sample_transaction();

    c.bench_function("transaction_id", |b| b.iter(|| black_box(&tx).txid()));
}

criterion_group!(
    benches,
    bench_merkle_root,
    bench_block_id,
    bench_next_difficulty,
    bench_txid,
);
criterion_main!(benches);
