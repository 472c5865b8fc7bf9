//! Trust score tracker: monthly update rule, clamping, idempotent close.

use riskdesk_core::{
    clock::Period,
    config::{DeskConfig, TrustConfig},
    trust::{initial_trust, updated_trust, MonthOutcomes, TrustTracker},
};
use std::collections::BTreeMap;

fn cfg() -> TrustConfig {
    DeskConfig::default_test().trust
}

fn outcomes(allow: u64, review: u64, block: u64) -> MonthOutcomes {
    MonthOutcomes { allow, review, block }
}

fn jan() -> Period {
    Period::new(2025, 1).unwrap()
}

#[test]
fn quiet_month_leaves_trust_unchanged() {
    assert_eq!(updated_trust(&cfg(), 0.42, &MonthOutcomes::default()), 0.42);
}

#[test]
fn clean_month_moves_up_by_at_most_max_step() {
    let c = cfg();
    // q = 1, smoothing 0.3 · (1 − 0.5) = 0.15, exactly the cap.
    assert!((updated_trust(&c, 0.5, &outcomes(4, 0, 0)) - 0.65).abs() < 1e-9);
    // 0.3 · (1 − 0) = 0.3 is capped at 0.15.
    assert!((updated_trust(&c, 0.0, &outcomes(10, 0, 0)) - 0.15).abs() < 1e-9);
    // Already at the top: no movement.
    assert_eq!(updated_trust(&c, 1.0, &outcomes(10, 0, 0)), 1.0);
}

#[test]
fn reviews_pull_trust_down() {
    // q = 0, step = 0.3 · (0 − 0.5) = −0.15, then −0.02 per review.
    let t = updated_trust(&cfg(), 0.5, &outcomes(0, 2, 0));
    assert!((t - 0.31).abs() < 1e-9, "got {t}");
    // Below the old midpoint a review month still costs trust.
    assert!(updated_trust(&cfg(), 0.4, &outcomes(0, 3, 0)) < 0.4);
}

#[test]
fn months_without_an_allow_never_raise_trust() {
    let c = cfg();
    for step in 0..=100 {
        let prev = step as f64 / 100.0;
        for o in [
            outcomes(0, 1, 0),
            outcomes(0, 7, 0),
            outcomes(0, 0, 1),
            outcomes(0, 0, 7),
            outcomes(0, 3, 4),
        ] {
            let t = updated_trust(&c, prev, &o);
            assert!(t <= prev, "prev {prev} {o:?} raised trust to {t}");
            if prev > 0.0 {
                assert!(t < prev, "prev {prev} {o:?} left trust flat");
            }
        }
    }
}

#[test]
fn blocks_pull_trust_down() {
    // q = 0.5, step = 0.3 · (0.5 − 0.8) = −0.09, then −0.05 for the block.
    let t = updated_trust(&cfg(), 0.8, &outcomes(1, 0, 1));
    assert!((t - 0.66).abs() < 1e-9, "got {t}");
}

#[test]
fn trust_is_clamped_to_unit_interval() {
    let c = cfg();
    assert_eq!(updated_trust(&c, 0.05, &outcomes(0, 0, 10)), 0.0);
    for prev in [0.0, 0.3, 0.7, 1.0] {
        for o in [outcomes(5, 0, 0), outcomes(0, 5, 0), outcomes(0, 0, 5), outcomes(2, 2, 2)] {
            let t = updated_trust(&c, prev, &o);
            assert!((0.0..=1.0).contains(&t), "prev {prev} {o:?} -> {t}");
        }
    }
}

#[test]
fn update_is_pure() {
    let c = cfg();
    let o = outcomes(3, 1, 1);
    assert_eq!(updated_trust(&c, 0.61, &o), updated_trust(&c, 0.61, &o));
}

#[test]
fn initial_trust_grows_with_tenure_and_history() {
    let c = cfg();
    assert!((initial_trust(&c, 0, 0) - 0.4).abs() < 1e-9);
    assert!((initial_trust(&c, 10_000, 10_000) - 0.9).abs() < 1e-9);
    assert!(initial_trust(&c, 365, 10) > initial_trust(&c, 30, 10));
    assert!(initial_trust(&c, 365, 80) > initial_trust(&c, 365, 10));
}

#[test]
fn closing_a_period_twice_is_a_no_op() {
    let mut tracker = TrustTracker::new(cfg());
    tracker.register("c-1", 0.5).unwrap();
    tracker.register("c-2", 0.5).unwrap();

    let mut month = BTreeMap::new();
    month.insert("c-1".to_string(), outcomes(3, 0, 0));

    let first = tracker.close_period(jan(), &month);
    assert_eq!(first.len(), 2, "every tracked customer gets a row");
    let after_first = tracker.trust_of("c-1").unwrap();
    assert!((after_first - 0.65).abs() < 1e-9);
    assert_eq!(tracker.trust_of("c-2"), Some(0.5), "no transactions, no change");

    let second = tracker.close_period(jan(), &month);
    assert!(second.is_empty());
    assert_eq!(tracker.trust_of("c-1"), Some(after_first));

    let feb = tracker.close_period(jan().next(), &month);
    assert_eq!(feb.len(), 2);
    assert!(tracker.trust_of("c-1").unwrap() > after_first);
}

#[test]
fn register_keeps_existing_score_and_validates_range() {
    let mut tracker = TrustTracker::new(cfg());
    tracker.register("c-1", 0.3).unwrap();
    tracker.register("c-1", 0.9).unwrap();
    assert_eq!(tracker.trust_of("c-1"), Some(0.3));
    assert_eq!(tracker.len(), 1);

    assert!(tracker.register("c-2", 1.5).is_err());
    assert!(tracker.register("c-3", f64::NAN).is_err());
    assert_eq!(tracker.trust_of("c-2"), None);
}
