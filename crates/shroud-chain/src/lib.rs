//! # shroud-chain — Blockchain storage engine.
//!
//! Holds the canonical chain, the confirmed transactions, the per-amount
//! output index that ring signatures reference and the spent key images.
//! Competing branches are pooled and switched to when they become heavier.
//! The whole state sits behind one lock in [`Blockchain`] and is persisted
//! as a single versioned file.
//!
//! Cryptographic checks, the mempool and checkpoints are supplied through
//! the traits in [`shroud_core::traits`].

pub mod alt_chain;
pub mod blockchain;
pub mod chain_index;
pub mod checkpoints;
pub mod config;
pub mod invalid;
pub mod output_index;
pub mod persistence;
pub mod queries;
pub mod spent_set;
pub mod tx_store;
pub mod validation;

mod reorg;
mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use blockchain::{BlockAcceptance, Blockchain};
pub use checkpoints::Checkpoints;
pub use config::ChainConfig;
