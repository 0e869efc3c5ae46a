//! Error types for the Shroud protocol.
//!
//! Rejections of peer data ([`TransactionError`], [`BlockError`]) are kept
//! apart from failures that mean our own state cannot be trusted
//! ([`ChainStateError`], [`PersistenceError`]).
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum TransactionError {
    #[error("serialization: {0}")] Serialization(String),
    #[error("no inputs")] NoInputs,
    #[error("input {index} is not a key input")] UnexpectedInputType { index: usize },
    #[error("input {index} has an empty ring")] EmptyRing { index: usize },
    #[error("input {index}: {got} signatures for a ring of {expected}")] SignatureCountMismatch { index: usize, expected: usize, got: usize },
    #[error("duplicate key image in transaction: {0}")] DuplicateKeyImage(String),
    #[error("value overflow")] ValueOverflow,
    #[error("outputs {outputs} exceed inputs {inputs}")] OutputsExceedInputs { inputs: u64, outputs: u64 },
    #[error("key image already spent: {0}")] KeyImageSpent(String),
    #[error("ring index {index} out of range for amount {amount} ({len} outputs)")] RingIndexOutOfRange { amount: u64, index: u64, len: u64 },
    #[error("ring member {member} of input {index} is still locked")] LockedRingMember { index: usize, member: usize },
    #[error("invalid ring signature on input {index}")] InvalidSignature { index: usize },
}

impl TransactionError {
    /// Shape errors that do not depend on chain state.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TransactionError::Serialization(_)
                | TransactionError::NoInputs
                | TransactionError::UnexpectedInputType { .. }
                | TransactionError::EmptyRing { .. }
                | TransactionError::SignatureCountMismatch { .. }
                | TransactionError::DuplicateKeyImage(_)
                | TransactionError::ValueOverflow
                | TransactionError::OutputsExceedInputs { .. }
        )
    }
}

/// How a rejection is treated by the block intake path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Malformed or unusable input. Dropped without being remembered.
    Structural,
    /// Well formed but breaks a consensus rule. Cached as invalid.
    Consensus,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum BlockError {
    #[error("unsupported block version {0}")] UnsupportedVersion(u8),
    #[error("malformed miner transaction: {0}")] MalformedMinerTx(String),
    #[error("miner transaction height {got}, expected {expected}")] MinerHeightMismatch { expected: u64, got: u64 },
    #[error("miner transaction unlock time {got}, expected {expected}")] MinerUnlockTime { expected: u64, got: u64 },
    #[error("duplicate transaction hash in block: {0}")] DuplicateTxHash(String),
    #[error("unknown transaction: {0}")] MissingTransaction(String),
    #[error("wrong prev id: expected {expected}, got {got}")] WrongPrevId { expected: String, got: String },
    #[error("timestamp {timestamp} beyond future limit {limit}")] TimestampTooFar { timestamp: u64, limit: u64 },
    #[error("timestamp {timestamp} not above median {median}")] TimestampBelowMedian { timestamp: u64, median: u64 },
    #[error("insufficient proof of work for difficulty {difficulty}")] InvalidProofOfWork { difficulty: u64 },
    #[error("checkpoint mismatch at height {height}")] CheckpointMismatch { height: u64 },
    #[error("alternative block at height {height} not allowed")] AlternativeNotAllowed { height: u64 },
    #[error("block size {size} exceeds limit {limit}")] Oversized { size: u64, limit: u64 },
    #[error("miner claims {got}, allowed {allowed}")] RewardTooHigh { got: u64, allowed: u64 },
    #[error("transaction already in chain: {0}")] DuplicateTransaction(String),
    #[error("tx error in {index}: {source}")] TransactionError { index: usize, source: TransactionError },
    #[error("alternative chain rejected at {id}: {reason}")] AlternativeChainFailed { id: String, reason: Box<BlockError> },
}

impl BlockError {
    pub fn kind(&self) -> RejectionKind {
        match self {
            BlockError::UnsupportedVersion(_)
            | BlockError::MalformedMinerTx(_)
            | BlockError::DuplicateTxHash(_)
            | BlockError::MissingTransaction(_)
            | BlockError::AlternativeNotAllowed { .. } => RejectionKind::Structural,
            BlockError::TransactionError { source, .. } if source.is_structural() => {
                RejectionKind::Structural
            }
            BlockError::AlternativeChainFailed { reason, .. } => reason.kind(),
            _ => RejectionKind::Consensus,
        }
    }
}

/// Broken internal invariants. Seeing one means the state is untrustworthy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")] EmptyChain,
    #[error("block not found: {0}")] BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")] HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")] DuplicateBlock(String),
    #[error("key image already spent: {0}")] AlreadySpent(String),
    #[error("key image not marked spent: {0}")] NotSpent(String),
    #[error("output index out of range for amount {amount}: {index} >= {len}")] OutputOutOfRange { amount: u64, index: u64, len: u64 },
    #[error("output index tail mismatch for amount {amount}")] OutputTailMismatch { amount: u64 },
    #[error("transaction not found: {0}")] TransactionNotFound(String),
    #[error("duplicate transaction entry: {0}")] DuplicateTransaction(String),
    #[error("no transaction at position {position} of block {height}")] TxPositionOutOfRange { height: u64, position: u32 },
    #[error("transaction {txid} has no output {index}")] OutputMissing { txid: String, index: u32 },
    #[error("height {0} exceeds the output index range")] HeightOverflow(u64),
}

/// Persisted state could not be trusted. Always fatal for the loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("io: {0}")] Io(String),
    #[error("bad magic bytes")] BadMagic,
    #[error("format version {version} below minimum {min}")] VersionTooOld { version: u32, min: u32 },
    #[error("format version {version} newer than supported {current}")] VersionTooNew { version: u32, current: u32 },
    #[error("encode: {0}")] Encode(String),
    #[error("decode: {0}")] Decode(String),
    #[error("checksum mismatch: stored {stored}, computed {computed}")] ChecksumMismatch { stored: u64, computed: u64 },
    #[error("legacy output of {txid} cannot be located in its block")] LegacyOutputUnresolved { txid: String },
    #[error("inconsistent block index: {0}")] IndexMismatch(String),
}

#[derive(Error, Debug)]
pub enum ShroudError {
    #[error(transparent)] Transaction(#[from] TransactionError),
    #[error(transparent)] Block(#[from] BlockError),
    #[error(transparent)] ChainState(#[from] ChainStateError),
    #[error(transparent)] Persistence(#[from] PersistenceError),
    #[error("config: {0}")] Config(String),
    #[error("unknown chain history: {0}")] UnknownHistory(String),
}
