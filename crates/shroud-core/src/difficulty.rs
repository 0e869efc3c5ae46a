//! Difficulty retarget.
//!
//! Difficulty is a u64 where **higher = harder**; a block's work equals its
//! difficulty and the chain with the largest cumulative difficulty wins.
//!
//! # Algorithm
//!
//! The caller supplies up to [`DIFFICULTY_BLOCKS_COUNT`] ancestors (oldest
//! first). Only the oldest [`DIFFICULTY_WINDOW`] are used, which leaves the
//! most recent [`DIFFICULTY_LAG`] blocks out of the computation. Timestamps
//! are sorted and [`DIFFICULTY_CUT`] outliers are removed from each end once
//! the window is full. The next difficulty is the work done inside the kept
//! span divided by its duration, scaled to the target interval:
//!
//! ```text
//! next = ceil(total_work * DIFFICULTY_TARGET / time_span)
//! ```
//!
//! A result of 0 signals arithmetic overflow and must be treated as invalid.
//!
//! [`DIFFICULTY_BLOCKS_COUNT`]: crate::constants::DIFFICULTY_BLOCKS_COUNT
//! [`DIFFICULTY_LAG`]: crate::constants::DIFFICULTY_LAG

use crate::constants::{DIFFICULTY_CUT, DIFFICULTY_TARGET, DIFFICULTY_WINDOW};

/// Compute the next difficulty from ancestor timestamps and cumulative
/// difficulties, both ordered oldest to newest.
///
/// Returns 1 when fewer than two ancestors are available.
pub fn next_difficulty(timestamps: &[u64], cumulative_difficulties: &[u64]) -> u64 {
    next_difficulty_for_target(timestamps, cumulative_difficulties, DIFFICULTY_TARGET)
}

/// [`next_difficulty`] with an explicit target interval in seconds.
pub fn next_difficulty_for_target(
    timestamps: &[u64],
    cumulative_difficulties: &[u64],
    target_seconds: u64,
) -> u64 {
    let length = timestamps
        .len()
        .min(cumulative_difficulties.len())
        .min(DIFFICULTY_WINDOW);
    if length <= 1 {
        return 1;
    }

    let mut sorted = timestamps[..length].to_vec();
    sorted.sort_unstable();
    let cumulative = &cumulative_difficulties[..length];

    let kept = DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT;
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept).div_ceil(2);
        (begin, begin + kept)
    };

    let time_span = (sorted[cut_end - 1] - sorted[cut_begin]).max(1);
    let total_work = cumulative[cut_end - 1].saturating_sub(cumulative[cut_begin]);

    let scaled = u128::from(total_work) * u128::from(target_seconds);
    if scaled > u128::from(u64::MAX) {
        return 0;
    }
    scaled.div_ceil(u128::from(time_span)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Evenly spaced chain with constant per-block difficulty.
    fn steady(count: usize, interval: u64, difficulty: u64) -> (Vec<u64>, Vec<u64>) {
        let timestamps = (0..count as u64).map(|i| 1_000 + i * interval).collect();
        let cumulative = (1..=count as u64).map(|i| i * difficulty).collect();
        (timestamps, cumulative)
    }

    #[test]
    fn empty_returns_one() {
        assert_eq!(next_difficulty(&[], &[]), 1);
    }

    #[test]
    fn single_returns_one() {
        assert_eq!(next_difficulty(&[5], &[10]), 1);
    }

    #[test]
    fn on_target_keeps_difficulty() {
        let (ts, cd) = steady(100, DIFFICULTY_TARGET, 1_000);
        assert_eq!(next_difficulty(&ts, &cd), 1_000);
    }

    #[test]
    fn fast_blocks_raise_difficulty() {
        let (ts, cd) = steady(100, DIFFICULTY_TARGET / 2, 1_000);
        assert_eq!(next_difficulty(&ts, &cd), 2_000);
    }

    #[test]
    fn slow_blocks_lower_difficulty() {
        let (ts, cd) = steady(100, DIFFICULTY_TARGET * 2, 1_000);
        assert_eq!(next_difficulty(&ts, &cd), 500);
    }

    #[test]
    fn full_window_cuts_outliers() {
        let (mut ts, cd) = steady(DIFFICULTY_WINDOW, DIFFICULTY_TARGET, 1_000);
        // A wildly early and a wildly late stamp land in the cut region.
        ts[0] = 0;
        ts[DIFFICULTY_WINDOW - 1] = u64::MAX / 2;
        assert_eq!(next_difficulty(&ts, &cd), 1_000);
    }

    #[test]
    fn lagged_blocks_are_ignored() {
        let (mut ts, mut cd) = steady(DIFFICULTY_WINDOW, DIFFICULTY_TARGET, 1_000);
        let base = next_difficulty(&ts, &cd);
        ts.extend([u64::MAX - 1; 15]);
        cd.extend([u64::MAX; 15]);
        assert_eq!(next_difficulty(&ts, &cd), base);
    }

    #[test]
    fn zero_time_span_does_not_divide_by_zero() {
        assert_eq!(next_difficulty(&[7, 7], &[10, 20]), 10 * DIFFICULTY_TARGET);
    }

    #[test]
    fn overflow_returns_zero() {
        assert_eq!(next_difficulty(&[0, 1], &[0, u64::MAX]), 0);
    }
}
