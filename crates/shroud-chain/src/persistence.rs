//! Persistence gateway: the whole chain state as one versioned file.
//!
//! Layout:
//!
//! ```text
//! "SHRD" | version: u32 LE | body | checksum: u64 (version >= 12)
//! ```
//!
//! The body is the bincode encoding of the block sequence, the id index, the
//! transaction store, the spent key images, the alternative pool, the output
//! index, the invalid-block cache and the cumulative size limit, in that
//! order. Versions 11 and 12 store output index entries as
//! `(txid, output index)`; loading translates them to
//! `(height, position in block, output index)` by finding the transaction
//! in its keeper block.
//!
//! The checksum is the sum of the container sizes plus the size limit. It is
//! recomputed after migration and any mismatch is fatal.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use tracing::{debug, error, info};

use shroud_core::constants::{
    PRUNING_DEPTH, PRUNING_STRIPE_MASK, STORAGE_CHECKSUM_VERSION, STORAGE_FORMAT_MIN_VERSION,
    STORAGE_FORMAT_VERSION, STORAGE_MAGIC,
};
use shroud_core::error::{PersistenceError, ShroudError};
use shroud_core::types::{Hash256, KeyImage};

use crate::alt_chain::AlternativeChains;
use crate::chain_index::{BlockExtendedInfo, ChainIndex};
use crate::config::ChainConfig;
use crate::invalid::{InvalidBlock, InvalidBlockCache};
use crate::output_index::{OutputEntry, OutputIndex};
use crate::spent_set::SpentKeyImages;
use crate::state::ChainState;
use crate::tx_store::{TransactionChainEntry, TransactionStore};

/// Output index as written by versions before 13: per amount, the defining
/// transaction id and the output's position in it.
type LegacyOutputs = BTreeMap<u64, Vec<(Hash256, u64)>>;

type OutputMap = BTreeMap<u64, Vec<OutputEntry>>;

const HEADER_LEN: usize = STORAGE_MAGIC.len() + 4;

#[derive(Debug, bincode::Encode, bincode::Decode)]
struct StateBody<O> {
    blocks: Vec<BlockExtendedInfo>,
    block_index: HashMap<Hash256, u64>,
    transactions: HashMap<Hash256, TransactionChainEntry>,
    spent_keys: HashSet<KeyImage>,
    alternative_chains: HashMap<Hash256, BlockExtendedInfo>,
    outputs: O,
    invalid_blocks: Vec<(Hash256, InvalidBlock)>,
    current_size_limit: u64,
}

/// A decoded body and the checksum it was stored with, if its version has one.
struct Versioned<O> {
    body: StateBody<O>,
    checksum: Option<u64>,
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

// ----------------------------------------------------------------------------
// Encoding
// ----------------------------------------------------------------------------

fn state_checksum(state: &ChainState) -> u64 {
    [
        state.index.len(),
        state.index.id_index().len() as u64,
        state.transactions.len() as u64,
        state.spent.len() as u64,
        state.alternatives.len() as u64,
        state.outputs.amount_count() as u64,
        state.invalid.len() as u64,
        state.current_size_limit,
    ]
    .into_iter()
    .fold(0u64, u64::wrapping_add)
}

fn body_checksum<O>(body: &StateBody<O>, output_amounts: usize) -> u64 {
    [
        body.blocks.len() as u64,
        body.block_index.len() as u64,
        body.transactions.len() as u64,
        body.spent_keys.len() as u64,
        body.alternative_chains.len() as u64,
        output_amounts as u64,
        body.invalid_blocks.len() as u64,
        body.current_size_limit,
    ]
    .into_iter()
    .fold(0u64, u64::wrapping_add)
}

fn header(version: u32) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN);
    bytes.extend_from_slice(&STORAGE_MAGIC);
    bytes.extend_from_slice(&version.to_le_bytes());
    bytes
}

/// Encode `state` in the current format.
pub(crate) fn encode_state(state: &ChainState) -> Result<Vec<u8>, PersistenceError> {
    encode_with_outputs(
        state,
        state.outputs.as_map(),
        STORAGE_FORMAT_VERSION,
        Some(state_checksum(state)),
    )
}

fn encode_with_outputs<O: bincode::Encode>(
    state: &ChainState,
    outputs: O,
    version: u32,
    checksum: Option<u64>,
) -> Result<Vec<u8>, PersistenceError> {
    // Field order must match `StateBody`.
    let body = (
        state.index.blocks(),
        state.index.id_index(),
        state.transactions.as_map(),
        state.spent.as_set(),
        state.alternatives.as_map(),
        outputs,
        state.invalid.to_entries(),
        state.current_size_limit,
    );
    let mut bytes = header(version);
    bincode::encode_into_std_write(body, &mut bytes, bincode_config())
        .map_err(|e| PersistenceError::Encode(e.to_string()))?;
    if let Some(checksum) = checksum {
        bincode::encode_into_std_write(checksum, &mut bytes, bincode_config())
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
    }
    Ok(bytes)
}

/// Write `state` to `path` through a temporary file in the same directory.
pub(crate) fn save(state: &ChainState, path: &Path) -> Result<(), PersistenceError> {
    let bytes = encode_state(state)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| PersistenceError::Io(e.to_string()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes).map_err(|e| PersistenceError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| PersistenceError::Io(e.to_string()))?;
    info!(
        path = %path.display(),
        height = state.chain_height(),
        bytes = bytes.len(),
        "blockchain stored"
    );
    Ok(())
}

// ----------------------------------------------------------------------------
// Decoding and migration
// ----------------------------------------------------------------------------

fn decode_exact<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, PersistenceError> {
    let (value, read) = bincode::decode_from_slice(bytes, bincode_config())
        .map_err(|e| PersistenceError::Decode(e.to_string()))?;
    if read != bytes.len() {
        return Err(PersistenceError::Decode(format!(
            "{} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(value)
}

fn read_header(bytes: &[u8]) -> Result<u32, PersistenceError> {
    if bytes.len() < HEADER_LEN || bytes[..STORAGE_MAGIC.len()] != STORAGE_MAGIC {
        return Err(PersistenceError::BadMagic);
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&bytes[STORAGE_MAGIC.len()..HEADER_LEN]);
    let version = u32::from_le_bytes(version);
    if version < STORAGE_FORMAT_MIN_VERSION {
        return Err(PersistenceError::VersionTooOld {
            version,
            min: STORAGE_FORMAT_MIN_VERSION,
        });
    }
    if version > STORAGE_FORMAT_VERSION {
        return Err(PersistenceError::VersionTooNew {
            version,
            current: STORAGE_FORMAT_VERSION,
        });
    }
    Ok(version)
}

/// Version 11 carries no checksum; it is treated as version 12 without one.
fn upgrade_11_to_12(body: StateBody<LegacyOutputs>) -> Versioned<LegacyOutputs> {
    Versioned {
        body,
        checksum: None,
    }
}

/// Translate legacy output references into positional entries.
fn upgrade_12_to_13(
    old: Versioned<LegacyOutputs>,
) -> Result<Versioned<OutputMap>, PersistenceError> {
    let Versioned { body, checksum } = old;
    let mut outputs = OutputMap::new();
    for (amount, refs) in &body.outputs {
        let entries = refs
            .iter()
            .map(|(txid, output)| locate_output(&body, txid, *output))
            .collect::<Result<Vec<_>, _>>()?;
        outputs.insert(*amount, entries);
    }
    debug!(amounts = outputs.len(), "legacy output index translated");

    let StateBody {
        blocks,
        block_index,
        transactions,
        spent_keys,
        alternative_chains,
        invalid_blocks,
        current_size_limit,
        ..
    } = body;
    Ok(Versioned {
        body: StateBody {
            blocks,
            block_index,
            transactions,
            spent_keys,
            alternative_chains,
            outputs,
            invalid_blocks,
            current_size_limit,
        },
        checksum,
    })
}

/// Find where output `output` of `txid` sits: its keeper block's height and
/// the transaction's position in that block (0 is the miner transaction).
fn locate_output(
    body: &StateBody<LegacyOutputs>,
    txid: &Hash256,
    output: u64,
) -> Result<OutputEntry, PersistenceError> {
    let unresolved = || PersistenceError::LegacyOutputUnresolved {
        txid: txid.to_string(),
    };
    let entry = body.transactions.get(txid).ok_or_else(unresolved)?;
    let height = entry.keeper_block_height;
    let block = usize::try_from(height)
        .ok()
        .and_then(|h| body.blocks.get(h))
        .map(|info| &info.block)
        .ok_or_else(unresolved)?;

    let position = if block.miner_tx.txid().ok().as_ref() == Some(txid) {
        0
    } else {
        block
            .tx_hashes
            .iter()
            .position(|h| h == txid)
            .map(|i| i + 1)
            .ok_or_else(unresolved)?
    };
    let index_in_tx = u32::try_from(output).map_err(|_| unresolved())?;
    if index_in_tx as usize >= entry.tx.outputs.len() {
        return Err(unresolved());
    }
    Ok(OutputEntry {
        block_height: u32::try_from(height).map_err(|_| unresolved())?,
        tx_in_block: u32::try_from(position).map_err(|_| unresolved())?,
        output_in_tx: index_in_tx,
    })
}

fn into_state(body: StateBody<OutputMap>, config: &ChainConfig) -> Result<ChainState, PersistenceError> {
    let mut state = ChainState::new(config.max_invalid_blocks);
    state.index = ChainIndex::from_parts(body.blocks, body.block_index)?;
    state.outputs = OutputIndex::from_map(body.outputs);
    state.spent = SpentKeyImages::from_set(body.spent_keys);
    state.transactions = TransactionStore::from_map(body.transactions);
    state.alternatives = AlternativeChains::from_map(body.alternative_chains);
    state.invalid = InvalidBlockCache::from_entries(config.max_invalid_blocks, body.invalid_blocks);
    state.current_size_limit = body.current_size_limit;
    Ok(state)
}

/// Decode a state file, migrating older versions and verifying the checksum.
pub(crate) fn decode_state(bytes: &[u8], config: &ChainConfig) -> Result<ChainState, PersistenceError> {
    let version = read_header(bytes)?;
    let payload = &bytes[HEADER_LEN..];

    let current = match version {
        STORAGE_FORMAT_VERSION => {
            let (body, checksum): (StateBody<OutputMap>, u64) = decode_exact(payload)?;
            Versioned {
                body,
                checksum: Some(checksum),
            }
        }
        STORAGE_CHECKSUM_VERSION => {
            let (body, checksum): (StateBody<LegacyOutputs>, u64) = decode_exact(payload)?;
            upgrade_12_to_13(Versioned {
                body,
                checksum: Some(checksum),
            })?
        }
        _ => {
            let body: StateBody<LegacyOutputs> = decode_exact(payload)?;
            upgrade_12_to_13(upgrade_11_to_12(body))?
        }
    };

    if let Some(stored) = current.checksum {
        let computed = body_checksum(&current.body, current.body.outputs.len());
        if stored != computed {
            error!(stored, computed, "state checksum mismatch");
            return Err(PersistenceError::ChecksumMismatch { stored, computed });
        }
    }
    if version < STORAGE_FORMAT_VERSION {
        info!(from = version, to = STORAGE_FORMAT_VERSION, "state migrated");
    }
    into_state(current.body, config)
}

/// Read and decode the state file at `path`, pruning old signatures when
/// enabled.
pub(crate) fn load(path: &Path, config: &ChainConfig) -> Result<ChainState, ShroudError> {
    let bytes = fs::read(path).map_err(|e| PersistenceError::Io(e.to_string()))?;
    let mut state = decode_state(&bytes, config).inspect_err(|e| {
        error!(path = %path.display(), %e, "stored blockchain is corrupt");
    })?;
    if config.pruning_enabled {
        prune_signatures(&mut state);
    }
    Ok(state)
}

// ----------------------------------------------------------------------------
// Pruning
// ----------------------------------------------------------------------------

/// Whether a block falls outside the kept stripe.
pub fn is_prunable(id: &Hash256) -> bool {
    id.0[31] & PRUNING_STRIPE_MASK != 0
}

/// Drop the signatures of non-coinbase transactions in prunable blocks more
/// than [`PRUNING_DEPTH`] below the tip. Returns how many were stripped.
pub(crate) fn prune_signatures(state: &mut ChainState) -> usize {
    let prune_below = state.chain_height().saturating_sub(PRUNING_DEPTH);
    if prune_below == 0 {
        return 0;
    }
    let ChainState {
        index,
        transactions,
        ..
    } = state;

    let mut pruned = 0;
    for (height, info) in index.blocks().iter().enumerate().take(prune_below as usize) {
        let Some(id) = index.hash_at(height as u64) else {
            continue;
        };
        if !is_prunable(&id) {
            continue;
        }
        for txid in &info.block.tx_hashes {
            if let Some(entry) = transactions.get_mut(txid) {
                if !entry.tx.signatures.is_empty() {
                    entry.tx.signatures.clear();
                    pruned += 1;
                }
            }
        }
    }
    info!(prune_below, pruned, "pruned transaction signatures");
    pruned
}

/// Output index of `state` in the pre-13 `(txid, output)` form.
#[cfg(test)]
fn legacy_outputs(state: &ChainState) -> Result<LegacyOutputs, ShroudError> {
    let mut legacy = LegacyOutputs::new();
    for (amount, entries) in state.outputs.as_map() {
        let refs = entries
            .iter()
            .map(|e| -> Result<(Hash256, u64), ShroudError> {
                let block = &state
                    .index
                    .block_at(u64::from(e.block_height))
                    .ok_or_else(|| {
                        PersistenceError::IndexMismatch(format!("no block at {}", e.block_height))
                    })?
                    .block;
                let txid = match e.tx_in_block {
                    0 => block.miner_tx.txid()?,
                    p => block.tx_hashes[p as usize - 1],
                };
                Ok((txid, u64::from(e.output_in_tx)))
            })
            .collect::<Result<Vec<_>, ShroudError>>()?;
        legacy.insert(*amount, refs);
    }
    Ok(legacy)
}

/// Encode `state` in an older format.
#[cfg(test)]
pub(crate) fn encode_legacy(state: &ChainState, version: u32) -> Result<Vec<u8>, ShroudError> {
    let legacy = legacy_outputs(state)?;
    let checksum = (version >= STORAGE_CHECKSUM_VERSION).then(|| state_checksum(state));
    Ok(encode_with_outputs(state, &legacy, version, checksum)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ring_spend, TestChain};
    use shroud_core::constants::COIN;
    use shroud_core::types::{Block, KeyImage, PublicKey, Signature, Transaction, TxInput, TxOutput};

    fn config() -> ChainConfig {
        ChainConfig::with_data_dir("/nonexistent")
    }

    /// A chain with a spend in its last block.
    fn chain_with_spend() -> TestChain {
        let t = TestChain::new().unwrap();
        t.mine_until_spendable().unwrap();
        let tx = ring_spend(
            COIN,
            &[0],
            KeyImage([9; 32]),
            vec![TxOutput {
                amount: COIN - 100,
                key: PublicKey([3; 32]),
            }],
        );
        let block = t.next_block(&[tx]);
        t.chain.submit_block(&block).unwrap();
        t
    }

    // --- Round trip ---

    #[test]
    fn current_format_round_trip() {
        let t = chain_with_spend();
        let state = t.chain.state.read();
        let bytes = encode_state(&state).unwrap();
        let decoded = decode_state(&bytes, &config()).unwrap();
        assert_eq!(decoded, *state);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("blockchain.bin");
        let t = chain_with_spend();
        let state = t.chain.state.read();
        save(&state, &path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let loaded = load(&path, &config()).unwrap();
        assert_eq!(loaded.digest().unwrap(), state.digest().unwrap());
    }

    // --- Migration ---

    #[test]
    fn legacy_versions_migrate_to_current() {
        let t = chain_with_spend();
        let state = t.chain.state.read();
        for version in [STORAGE_FORMAT_MIN_VERSION, STORAGE_CHECKSUM_VERSION] {
            let bytes = encode_legacy(&state, version).unwrap();
            let decoded = decode_state(&bytes, &config()).unwrap();
            assert_eq!(decoded.outputs, state.outputs, "version {version}");
            assert_eq!(decoded.digest().unwrap(), state.digest().unwrap());
        }
    }

    #[test]
    fn legacy_output_without_transaction_is_fatal() {
        let t = TestChain::new().unwrap();
        t.mine(2).unwrap();
        let state = t.chain.state.read().clone();
        let legacy = legacy_outputs(&state).unwrap();

        // Forget the tip coinbase while its output stays indexed.
        let mut broken = state.clone();
        let tip_coinbase = state.index.tip_info().unwrap().block.miner_tx.txid().unwrap();
        broken.transactions.remove(&tip_coinbase);
        let bytes =
            encode_with_outputs(&broken, &legacy, STORAGE_FORMAT_MIN_VERSION, None).unwrap();
        assert!(matches!(
            decode_state(&bytes, &config()),
            Err(PersistenceError::LegacyOutputUnresolved { .. })
        ));
    }

    #[test]
    fn empty_legacy_amount_is_preserved() {
        let t = TestChain::new().unwrap();
        let state = t.chain.state.read().clone();
        let mut legacy = LegacyOutputs::new();
        for (amount, entries) in state.outputs.as_map() {
            let txid = state.index.block_at(0).unwrap().block.miner_tx.txid().unwrap();
            legacy.insert(*amount, entries.iter().map(|e| (txid, u64::from(e.output_in_tx))).collect());
        }
        legacy.insert(77, Vec::new());
        let bytes = encode_with_outputs(&state, &legacy, STORAGE_FORMAT_MIN_VERSION, None).unwrap();
        let decoded = decode_state(&bytes, &config()).unwrap();
        assert_eq!(decoded.outputs.entries(77), &[] as &[OutputEntry]);
        assert_eq!(decoded.outputs.amount_count(), state.outputs.amount_count() + 1);
    }

    // --- Corruption ---

    #[test]
    fn checksum_mismatch_is_fatal() {
        let t = TestChain::new().unwrap();
        t.mine(2).unwrap();
        let state = t.chain.state.read();
        let mut bytes = encode_state(&state).unwrap();
        // The checksum is the last field; its final byte is the high byte
        // of a varint-encoded u16.
        let last = bytes.len() - 1;
        bytes[last] = bytes[last].wrapping_add(1);
        assert!(matches!(
            decode_state(&bytes, &config()),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_and_versions_rejected() {
        let t = TestChain::new().unwrap();
        let state = t.chain.state.read();
        let bytes = encode_state(&state).unwrap();

        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert_eq!(decode_state(&bad_magic, &config()).unwrap_err(), PersistenceError::BadMagic);
        assert_eq!(decode_state(&[], &config()).unwrap_err(), PersistenceError::BadMagic);

        let mut too_old = bytes.clone();
        too_old[4..8].copy_from_slice(&10u32.to_le_bytes());
        assert!(matches!(
            decode_state(&too_old, &config()),
            Err(PersistenceError::VersionTooOld { version: 10, .. })
        ));

        let mut too_new = bytes;
        too_new[4..8].copy_from_slice(&14u32.to_le_bytes());
        assert!(matches!(
            decode_state(&too_new, &config()),
            Err(PersistenceError::VersionTooNew { version: 14, .. })
        ));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let t = TestChain::new().unwrap();
        let state = t.chain.state.read();
        let mut bytes = encode_state(&state).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_state(&bytes, &config()),
            Err(PersistenceError::Decode(_))
        ));
    }

    // --- Pruning ---

    fn synthetic_block(height: u64, tx_hashes: Vec<Hash256>) -> BlockExtendedInfo {
        let mut block = Block::default();
        block.header.timestamp = height;
        block.miner_tx.inputs = vec![TxInput::Gen { height }];
        block.tx_hashes = tx_hashes;
        BlockExtendedInfo {
            block,
            height,
            block_cumulative_size: 0,
            cumulative_difficulty: height,
            already_generated_coins: 0,
        }
    }

    fn signed_tx(tag: u8) -> Transaction {
        Transaction {
            inputs: vec![TxInput::ToKey {
                amount: 1,
                key_offsets: vec![0],
                key_image: KeyImage([tag; 32]),
            }],
            signatures: vec![vec![Signature::default()]],
            ..Transaction::default()
        }
    }

    #[test]
    fn pruning_strips_only_old_prunable_blocks() {
        let mut state = ChainState::new(8);
        let mut with_tx = Vec::new();
        let total = PRUNING_DEPTH + 40;
        for height in 0..total {
            // A transaction in the first 40 blocks and in the newest one.
            let tx_hashes = if height < 40 || height == total - 1 {
                let tx = signed_tx(height as u8);
                let txid = Hash256(blake3::hash(&height.to_le_bytes()).into());
                state
                    .transactions
                    .insert(
                        txid,
                        TransactionChainEntry {
                            tx,
                            keeper_block_height: height,
                            global_output_indexes: Vec::new(),
                        },
                    )
                    .unwrap();
                with_tx.push((height, txid));
                vec![txid]
            } else {
                Vec::new()
            };
            let info = synthetic_block(height, tx_hashes);
            let id = info.block.hash().unwrap();
            state.index.push(id, info).unwrap();
        }

        let pruned = prune_signatures(&mut state);
        let mut expected = 0;
        for (height, txid) in with_tx {
            let id = state.index.hash_at(height).unwrap();
            let stripped = state.transactions.get(&txid).unwrap().tx.signatures.is_empty();
            let should_strip = height < 40 && is_prunable(&id);
            assert_eq!(stripped, should_strip, "height {height}");
            expected += usize::from(should_strip);
        }
        assert_eq!(pruned, expected);
        // 40 blocks with one in eight kept: some must have been stripped.
        assert!(pruned > 0);
    }

    #[test]
    fn short_chain_is_never_pruned() {
        let t = chain_with_spend();
        let mut state = t.chain.state.read().clone();
        let before = state.clone();
        assert_eq!(prune_signatures(&mut state), 0);
        assert_eq!(state, before);
    }
}
