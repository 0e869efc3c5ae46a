//! The locked public handle of the storage engine.
//!
//! [`Blockchain`] wraps the chain state in a single `RwLock`. Block intake,
//! reorganizations and persistence take the write lock; every read-side query
//! takes the read lock for its whole duration. Two atomic flags report side
//! states without touching the lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use shroud_core::error::{RejectionKind, ShroudError};
use shroud_core::traits::{CheckpointSource, TxPool, Verifier};
use shroud_core::types::Block;

use crate::checkpoints::Checkpoints;
use crate::config::ChainConfig;
use crate::invalid::InvalidBlock;
use crate::persistence;
use crate::state::ChainState;

/// Outcome of [`Blockchain::submit_block`] for a block that was not rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockAcceptance {
    /// Extended the main chain.
    MainChain { height: u64 },
    /// Completed a heavier branch; the main chain now ends at `height`.
    Reorganized {
        height: u64,
        fork_height: u64,
        /// Main-chain blocks that were disconnected.
        disconnected: usize,
    },
    /// Buffered on a side branch.
    Alternative { height: u64 },
    /// Parent unknown; nothing was stored.
    Orphan,
    /// Already on the main chain or in the alternative pool.
    AlreadyKnown,
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

pub struct Blockchain {
    pub(crate) state: RwLock<ChainState>,
    pub(crate) verifier: Arc<dyn Verifier>,
    pub(crate) pool: Arc<dyn TxPool>,
    pub(crate) checkpoints: Arc<dyn CheckpointSource>,
    clock: Clock,
    pub(crate) config: ChainConfig,
    in_checkpoint_zone: AtomicBool,
    storing: AtomicBool,
}

impl Blockchain {
    /// Create an empty engine. Call [`init`](Self::init) or
    /// [`reset_and_set_genesis`](Self::reset_and_set_genesis) before use.
    pub fn new(config: ChainConfig, verifier: Arc<dyn Verifier>, pool: Arc<dyn TxPool>) -> Self {
        Self {
            state: RwLock::new(ChainState::new(config.max_invalid_blocks)),
            verifier,
            pool,
            checkpoints: Arc::new(Checkpoints::new()),
            clock: Box::new(|| chrono::Utc::now().timestamp().max(0) as u64),
            config,
            in_checkpoint_zone: AtomicBool::new(false),
            storing: AtomicBool::new(false),
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<dyn CheckpointSource>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    /// Replace the wall clock (unix seconds) used by timestamp and unlock checks.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        (self.clock)()
    }

    /// Load the stored state, or start a fresh chain from `genesis` when no
    /// state file exists.
    pub fn init(&self, genesis: &Block) -> Result<(), ShroudError> {
        let path = self.config.state_path();
        if !path.exists() {
            info!(path = %path.display(), "no stored blockchain, starting from genesis");
            return self.reset_and_set_genesis(genesis);
        }

        let loaded = persistence::load(&path, &self.config)?;
        let genesis_id = genesis.hash()?;
        if loaded.index.hash_at(0) != Some(genesis_id) {
            return Err(ShroudError::UnknownHistory(format!(
                "stored chain does not start at genesis {genesis_id}"
            )));
        }

        let height = loaded.chain_height();
        *self.state.write() = loaded;
        self.refresh_checkpoint_zone(height);
        info!(height, path = %path.display(), "blockchain loaded");
        Ok(())
    }

    /// Clear every container and accept `genesis` as height 0 through the
    /// normal acceptance path.
    pub fn reset_and_set_genesis(&self, genesis: &Block) -> Result<(), ShroudError> {
        let id = genesis.hash()?;
        let mut state = self.state.write();
        state.clear();
        self.handle_block_to_main_chain(&mut state, genesis, id, None)?;
        Ok(())
    }

    /// Persist the whole state to the configured path.
    pub fn store(&self) -> Result<(), ShroudError> {
        let state = self.state.read();
        self.storing.store(true, Ordering::SeqCst);
        let result = persistence::save(&state, &self.config.state_path());
        self.storing.store(false, Ordering::SeqCst);
        Ok(result?)
    }

    /// Whether a [`store`](Self::store) is in progress.
    pub fn is_storing(&self) -> bool {
        self.storing.load(Ordering::SeqCst)
    }

    /// Whether the chain tip is at or below the highest checkpoint.
    pub fn is_in_checkpoint_zone(&self) -> bool {
        self.in_checkpoint_zone.load(Ordering::SeqCst)
    }

    pub(crate) fn refresh_checkpoint_zone(&self, chain_height: u64) {
        let zone = self.checkpoints.is_in_checkpoint_zone(chain_height);
        self.in_checkpoint_zone.store(zone, Ordering::SeqCst);
    }

    /// Offer a block to the engine.
    ///
    /// Blocks extending the tip go through full validation; others are
    /// buffered as alternatives and may trigger a switch. Consensus
    /// rejections are remembered, and resubmitting such a block returns the
    /// remembered reason without validating again.
    pub fn submit_block(&self, block: &Block) -> Result<BlockAcceptance, ShroudError> {
        let id = block.hash()?;
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.index.contains(&id) || state.alternatives.contains(&id) {
            debug!(%id, "block already known");
            return Ok(BlockAcceptance::AlreadyKnown);
        }
        if let Some(known) = state.invalid.get(&id) {
            debug!(%id, height = known.height, "block already marked invalid");
            return Err(known.reason.clone().into());
        }

        let result = if block.header.prev_id == state.tail_id() {
            self.handle_block_to_main_chain(state, block, id, None)
                .map(|height| BlockAcceptance::MainChain { height })
        } else {
            let result = self.handle_alternative_block(state, block, id);
            let min_height = state
                .chain_height()
                .saturating_sub(self.config.alt_chain_retention);
            let ChainState {
                alternatives,
                index,
                ..
            } = &mut *state;
            let dropped = alternatives.discard_stale(min_height, |parent| index.contains(parent));
            if dropped > 0 {
                debug!(dropped, min_height, "discarded stale alternative blocks");
            }
            result
        };

        if let Err(ShroudError::Block(reason)) = &result {
            if reason.kind() == RejectionKind::Consensus && !state.invalid.contains(&id) {
                let height = block.height().unwrap_or_else(|| state.chain_height());
                warn!(%id, height, %reason, "block marked invalid");
                state.invalid.insert(
                    id,
                    InvalidBlock {
                        height,
                        reason: reason.clone(),
                    },
                );
            }
        }
        result
    }
}
