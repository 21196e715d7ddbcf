// SPDX-License-Identifier: CC0-1.0

use bitcoin::Amount;
use electrum::provider::block_subsidy;

#[test]
fn subsidy_schedule_matches_known_checkpoints() {
    assert_eq!(block_subsidy(0), Amount::from_sat(5_000_000_000));
    assert_eq!(block_subsidy(1), Amount::from_sat(5_000_000_000));
    assert_eq!(block_subsidy(209_999), Amount::from_sat(5_000_000_000));
    assert_eq!(block_subsidy(210_000), Amount::from_sat(2_500_000_000));
    assert_eq!(block_subsidy(420_000), Amount::from_sat(1_250_000_000));
    assert_eq!(block_subsidy(630_000), Amount::from_sat(625_000_000));
}

#[test]
fn subsidy_reaches_zero_once_halvings_exhaust_the_sat_range() {
    assert_eq!(block_subsidy(210_000 * 64), Amount::ZERO);
}
