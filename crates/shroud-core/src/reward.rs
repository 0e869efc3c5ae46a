//! Emission schedule and block-size penalty.
//!
//! The base reward is a fixed fraction of the coins not yet generated:
//! `(MONEY_SUPPLY - already_generated) >> EMISSION_SPEED_FACTOR`. Because
//! `already_generated` only grows with height, the base reward decreases
//! monotonically along the chain.
//!
//! Blocks larger than the median of recent block sizes pay a quadratic
//! penalty:
//!
//! ```text
//! reward = base * (2m - s) * s / m^2     for m < s <= 2m
//! ```
//!
//! where `m` is the median (floored at
//! [`BLOCK_GRANTED_FULL_REWARD_ZONE`](crate::constants::BLOCK_GRANTED_FULL_REWARD_ZONE))
//! and `s` the block size. Blocks above `2m` are invalid.

use crate::constants::{BLOCK_GRANTED_FULL_REWARD_ZONE, EMISSION_SPEED_FACTOR, MONEY_SUPPLY};

/// Base reward before any size penalty.
pub fn base_reward(already_generated_coins: u64) -> u64 {
    MONEY_SUPPLY.saturating_sub(already_generated_coins) >> EMISSION_SPEED_FACTOR
}

/// Median floored at the full reward zone.
pub fn effective_median(median_size: u64) -> u64 {
    median_size.max(BLOCK_GRANTED_FULL_REWARD_ZONE)
}

/// Block reward for a block of `current_block_size` bytes.
///
/// Returns `None` when the block is more than twice the effective median.
pub fn block_reward(
    median_size: u64,
    current_block_size: u64,
    already_generated_coins: u64,
) -> Option<u64> {
    let base = base_reward(already_generated_coins);
    let median = effective_median(median_size);

    if current_block_size <= median {
        return Some(base);
    }
    if current_block_size > median.saturating_mul(2) {
        return None;
    }

    // (2m - s) * s <= m^2, so the quotient never exceeds the base reward.
    let median = u128::from(median);
    let size = u128::from(current_block_size);
    let multiplicand = (2 * median - size) * size;
    let product = u128::from(base).checked_mul(multiplicand)?;
    Some((product / median / median) as u64)
}

/// Largest cumulative block size accepted for a given size median.
pub fn max_block_size(median_size: u64) -> u64 {
    effective_median(median_size).saturating_mul(2)
}
