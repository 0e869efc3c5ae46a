//! Protocol constants.

/// Atomic units per coin.
pub const COIN: u64 = 1_000_000_000_000;

/// Total supply cap in atomic units.
pub const MONEY_SUPPLY: u64 = u64::MAX;

/// Right shift applied to the remaining supply to obtain the base reward.
pub const EMISSION_SPEED_FACTOR: u32 = 20;

/// Target block interval in seconds.
pub const DIFFICULTY_TARGET: u64 = 120;

/// Blocks considered by the difficulty retarget.
pub const DIFFICULTY_WINDOW: usize = 720;

/// Most recent blocks left out of the retarget window.
pub const DIFFICULTY_LAG: usize = 15;

/// Outlier timestamps cut from each end of the sorted window.
pub const DIFFICULTY_CUT: usize = 60;

/// Blocks fetched from the chain to feed one retarget.
pub const DIFFICULTY_BLOCKS_COUNT: usize = DIFFICULTY_WINDOW + DIFFICULTY_LAG;

/// Ancestors whose median timestamp a new block must exceed.
pub const TIMESTAMP_CHECK_WINDOW: usize = 60;

/// Maximum drift of a block timestamp ahead of local adjusted time (2 hours).
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;

/// Blocks whose sizes feed the reward penalty median and the size limit.
pub const REWARD_BLOCKS_WINDOW: usize = 100;

/// Floor for the block size median, in bytes.
pub const BLOCK_GRANTED_FULL_REWARD_ZONE: u64 = 10_000;

/// Coinbase outputs unlock this many blocks after the block that mints them.
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;

/// Unlock times below this value are block heights, above it unix times.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

/// Height slack granted when evaluating height-based unlock times.
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;

/// Time slack granted when evaluating time-based unlock times.
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS: u64 = DIFFICULTY_TARGET * LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Outputs younger than this many blocks are not offered as decoys.
pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;

/// Block major version produced and accepted by this release.
pub const CURRENT_BLOCK_MAJOR_VERSION: u8 = 1;

/// Block minor version produced by this release.
pub const CURRENT_BLOCK_MINOR_VERSION: u8 = 0;

/// Transaction version produced by this release.
pub const CURRENT_TRANSACTION_VERSION: u64 = 1;

/// Blocks kept unpruned behind the tip.
pub const PRUNING_DEPTH: u64 = 10_000;

/// Mask applied to the last id byte to pick the pruning stripe.
pub const PRUNING_STRIPE_MASK: u8 = 0x07;

/// Maximum block ids returned in one chain entry during sync.
pub const BLOCKS_IDS_SYNCHRONIZING_DEFAULT_COUNT: usize = 10_000;

/// Maximum blocks returned in one supplement during sync.
pub const BLOCKS_SYNCHRONIZING_DEFAULT_COUNT: usize = 200;

/// Short chain history lists this many consecutive ids before doubling gaps.
pub const SHORT_CHAIN_HISTORY_DENSE: usize = 10;

/// Default capacity of the invalid-block cache.
pub const MAX_INVALID_BLOCKS: usize = 1_024;

/// Persisted state format written by this release.
pub const STORAGE_FORMAT_VERSION: u32 = 13;

/// Oldest persisted state format that can still be loaded.
pub const STORAGE_FORMAT_MIN_VERSION: u32 = 11;

/// First format carrying the container-size checksum.
pub const STORAGE_CHECKSUM_VERSION: u32 = 12;

/// Magic bytes at the start of a persisted state file.
pub const STORAGE_MAGIC: [u8; 4] = *b"SHRD";
