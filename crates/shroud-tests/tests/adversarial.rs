//! Adversarial property-based test suite for the storage engine.
//!
//! Chain-level properties build real chains over the mock verifier, so they
//! run fewer cases than the pure rule properties.
//!
//! Attack vectors tested:
//! - Competing branches of random shape and fork point
//! - Branches that fail part way through a switch
//! - Double spends across blocks and within a block
//! - Out-of-range and locked ring references
//! - Timestamp manipulation around the median window
//! - Coinbase inflation against the reward rule

use proptest::prelude::*;
use shroud_chain::testing::TestChain;
use shroud_chain::validation::{check_block_timestamp, validate_miner_transaction};
use shroud_core::constants::*;
use shroud_core::error::{BlockError, ShroudError};
use shroud_core::reward;
use shroud_core::types::Hash256;
use shroud_core::util;
use shroud_tests::helpers::{spend_coin, spendable_chain, submit_branch};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Every main-chain height maps to an id that maps back to it.
fn assert_index_consistent(t: &TestChain) -> Result<(), TestCaseError> {
    let height = t.chain.height();
    for h in 0..height {
        let id = t.chain.block_id_by_height(h);
        prop_assert!(id.is_some(), "no id at height {}", h);
        prop_assert_eq!(t.chain.block_height(&id.unwrap_or_default()), Some(h));
    }
    prop_assert!(t.chain.block_id_by_height(height).is_none());
    Ok(())
}

/// With no spends, every non-genesis main block adds exactly one COIN
/// output, in height order.
fn assert_outputs_follow_chain(t: &TestChain) -> Result<(), TestCaseError> {
    let outs = t.chain.get_outs(COIN);
    prop_assert_eq!(outs.len() as u64, t.chain.height() - 1);
    for (i, entry) in outs.iter().enumerate() {
        prop_assert_eq!(u64::from(entry.block_height), i as u64 + 1);
        prop_assert_eq!(entry.tx_in_block, 0);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reorganization
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_branches_keep_indexes_consistent(
        main_len in 1usize..8,
        branches in prop::collection::vec((0u64..8, 1usize..6), 1..4),
    ) {
        let t = TestChain::new().unwrap();
        t.mine(main_len).unwrap();

        for (nonce, (fork_at, len)) in branches.into_iter().enumerate() {
            let fork_height = fork_at.min(t.chain.height() - 1);
            let fork = t.chain.block_id_by_height(fork_height).unwrap();
            // Distinct nonces keep sibling blocks distinct.
            let _ = submit_branch(&t, fork, fork_height + 1, len, nonce as u32 + 1);
            assert_index_consistent(&t)?;
            assert_outputs_follow_chain(&t)?;
        }
    }

    #[test]
    fn heavier_branch_always_wins(
        main_len in 1usize..6,
        fork_at in 0u64..6,
        extra in 1usize..4,
    ) {
        let t = TestChain::new().unwrap();
        t.mine(main_len).unwrap();
        let fork_height = fork_at.min(t.chain.height() - 1);
        let fork = t.chain.block_id_by_height(fork_height).unwrap();
        let branch_len = (t.chain.height() - 1 - fork_height) as usize + extra;

        let ids = submit_branch(&t, fork, fork_height + 1, branch_len, 7).unwrap();
        prop_assert_eq!(t.chain.tail_id(), *ids.last().unwrap());
        prop_assert_eq!(t.chain.height(), fork_height + 1 + branch_len as u64);
        assert_index_consistent(&t)?;
    }

    #[test]
    fn failed_switch_is_invisible(
        main_len in 2usize..6,
        bad_offset in 0usize..4,
    ) {
        let t = TestChain::new().unwrap();
        t.mine(main_len).unwrap();
        let digest = t.chain.state_digest().unwrap();
        let tail = t.chain.tail_id();

        // Branch from genesis, one block longer than the main chain, with an
        // inflated coinbase somewhere along it.
        let branch_len = main_len + 1;
        let bad = bad_offset.min(branch_len - 1);
        let mut parent = t.chain.block_id_by_height(0).unwrap();
        let mut outcome = Ok(());
        for offset in 0..branch_len {
            let mut block = t.build_on(parent, offset as u64 + 1, 3, &[]);
            if offset == bad {
                block.miner_tx.outputs[0].amount = u64::MAX / 4;
            }
            parent = block.hash().unwrap();
            if let Err(e) = t.chain.submit_block(&block) {
                outcome = Err(e);
                break;
            }
        }

        let failed = matches!(
            outcome,
            Err(ShroudError::Block(BlockError::AlternativeChainFailed { .. }))
        );
        prop_assert!(failed, "switch should fail: {:?}", outcome);
        prop_assert_eq!(t.chain.state_digest().unwrap(), digest);
        prop_assert_eq!(t.chain.tail_id(), tail);
        assert_index_consistent(&t)?;
    }
}

// ---------------------------------------------------------------------------
// Spends
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    #[test]
    fn key_image_spends_once(
        image in any::<u8>(),
        first_ring in prop::collection::btree_set(0u64..5, 1..4),
        second_ring in prop::collection::btree_set(0u64..5, 1..4),
        fee in 0u64..1_000,
    ) {
        let t = spendable_chain().unwrap();
        // Mine enough that outputs 0..5 are unlocked.
        t.mine(5).unwrap();
        let first: Vec<u64> = first_ring.into_iter().collect();
        let second: Vec<u64> = second_ring.into_iter().collect();

        t.chain.submit_block(&t.next_block(&[spend_coin(image, &first, fee)])).unwrap();
        let before = t.chain.state_digest().unwrap();

        let replay = t.next_block(&[spend_coin(image, &second, fee + 1)]);
        prop_assert!(t.chain.submit_block(&replay).is_err());
        prop_assert_eq!(t.chain.state_digest().unwrap(), before);
        prop_assert!(t.chain.is_block_invalid(&replay.hash().unwrap()));
    }

    #[test]
    fn out_of_range_ring_rejected(past_end in 0u64..1_000) {
        let t = spendable_chain().unwrap();
        let len = t.chain.get_outs(COIN).len() as u64;
        let before = t.chain.state_digest().unwrap();

        let block = t.next_block(&[spend_coin(1, &[0, len + past_end], 10)]);
        prop_assert!(t.chain.submit_block(&block).is_err());
        prop_assert_eq!(t.chain.state_digest().unwrap(), before);
        prop_assert!(t.chain.resolve_ring_members(COIN, &[len + past_end]).is_err());
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn timestamp_must_beat_median(
        ancestors in prop::collection::vec(1_000_000u64..2_000_000, 0..80),
        timestamp in 0u64..3_000_000,
    ) {
        let now = 2_000_000;
        let result = check_block_timestamp(&ancestors, timestamp, now);
        if timestamp > now + BLOCK_FUTURE_TIME_LIMIT {
            let too_far = matches!(result, Err(BlockError::TimestampTooFar { .. }));
            prop_assert!(too_far);
        } else if ancestors.len() < TIMESTAMP_CHECK_WINDOW {
            prop_assert!(result.is_ok());
        } else {
            let window = ancestors[ancestors.len() - TIMESTAMP_CHECK_WINDOW..].to_vec();
            let median = util::median(window);
            prop_assert_eq!(result.is_ok(), timestamp > median);
        }
    }

    #[test]
    fn coinbase_cannot_exceed_reward_plus_fees(
        generated in 0u64..u64::MAX / 2,
        size in 0u64..40_000,
        fees in 0u64..1_000_000,
        claim_delta in 0u64..1_000,
        over in any::<bool>(),
    ) {
        let median = BLOCK_GRANTED_FULL_REWARD_ZONE;
        let Some(reward) = reward::block_reward(median, size, generated) else {
            prop_assert!(size > 2 * median);
            return Ok(());
        };
        prop_assert!(reward <= reward::base_reward(generated));

        let allowed = reward + fees;
        let claim = if over { allowed + 1 + claim_delta } else { allowed.saturating_sub(claim_delta) };
        let mut block = shroud_chain::testing::make_block(Hash256::ZERO, 1, 0, 0, Vec::new());
        block.miner_tx.outputs[0].amount = claim;

        let result = validate_miner_transaction(&block, size, median, generated, fees);
        if over {
            let too_high = matches!(result, Err(BlockError::RewardTooHigh { .. }));
            prop_assert!(too_high);
        } else {
            prop_assert_eq!(result, Ok(reward));
        }
    }
}
