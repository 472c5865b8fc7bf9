//! Decision engine: policy thresholds, flag severities, input validation.

use riskdesk_core::{
    decision::{
        decide, Decision, DecisionEngine, DecisionPolicy, FlagSeverity, REASON_COMBINED_RISK_BLOCK,
        REASON_COMBINED_RISK_REVIEW, REASON_ML_SCORE_MISSING,
    },
    error::DeskError,
    signals::RuleFlag,
};
use std::collections::{BTreeMap, BTreeSet};

fn policy() -> DecisionPolicy {
    let mut flag_severity = BTreeMap::new();
    flag_severity.insert(RuleFlag::SanctionedCorridor, FlagSeverity::Critical);
    flag_severity.insert(RuleFlag::HighRiskCorridor, FlagSeverity::Escalate);
    DecisionPolicy {
        review_threshold: 0.3,
        block_threshold: 0.6,
        ml_weight: 0.7,
        trust_weight: 0.3,
        flag_severity,
    }
}

fn flags(list: &[RuleFlag]) -> BTreeSet<RuleFlag> {
    list.iter().copied().collect()
}

#[test]
fn low_ml_high_trust_allows() {
    let out = decide(&policy(), &flags(&[]), Some(0.2), 0.9).unwrap();
    let combined = out.combined_risk.unwrap();
    assert!((combined - 0.17).abs() < 1e-9, "combined = {combined}");
    assert_eq!(out.decision, Decision::Allow);
    assert!(out.reason_codes.is_empty());
}

#[test]
fn high_ml_low_trust_blocks() {
    let out = decide(&policy(), &flags(&[]), Some(0.8), 0.2).unwrap();
    assert!((out.combined_risk.unwrap() - 0.8).abs() < 1e-9);
    assert_eq!(out.decision, Decision::Block);
    assert_eq!(out.reason_codes, vec![REASON_COMBINED_RISK_BLOCK.to_string()]);
}

/// A critical flag overrides even the safest scores.
#[test]
fn critical_flag_forces_block() {
    let out = decide(&policy(), &flags(&[RuleFlag::SanctionedCorridor]), Some(0.01), 0.99).unwrap();
    assert_eq!(out.decision, Decision::Block);
    assert_eq!(out.combined_risk, None, "critical short-circuit must not blend");
    assert_eq!(out.reason_codes, vec!["SANCTIONED_CORRIDOR".to_string()]);
}

#[test]
fn escalate_flag_lifts_allow_to_review() {
    let out = decide(&policy(), &flags(&[RuleFlag::HighRiskCorridor]), Some(0.1), 0.9).unwrap();
    assert_eq!(out.decision, Decision::Review);
    assert!(out.combined_risk.unwrap() < 0.3);
    assert!(out.reason_codes.contains(&"HIGH_RISK_CORRIDOR".to_string()));
    assert!(!out.reason_codes.contains(&REASON_COMBINED_RISK_REVIEW.to_string()));
}

#[test]
fn escalate_flag_never_lowers_block() {
    let out = decide(&policy(), &flags(&[RuleFlag::HighRiskCorridor]), Some(0.9), 0.1).unwrap();
    assert_eq!(out.decision, Decision::Block);
}

#[test]
fn info_flags_are_reported_only() {
    let with = decide(
        &policy(),
        &flags(&[RuleFlag::NewCorridor, RuleFlag::DeviceChange]),
        Some(0.2),
        0.9,
    )
    .unwrap();
    let without = decide(&policy(), &flags(&[]), Some(0.2), 0.9).unwrap();
    assert_eq!(with.decision, without.decision);
    assert_eq!(with.combined_risk, without.combined_risk);
    assert_eq!(with.reason_codes, vec!["NEW_CORRIDOR".to_string(), "DEVICE_CHANGE".to_string()]);
}

/// Missing ML score is read as maximum risk.
#[test]
fn missing_ml_score_fails_safe() {
    let out = decide(&policy(), &flags(&[]), None, 0.9).unwrap();
    assert!((out.combined_risk.unwrap() - 0.73).abs() < 1e-9);
    assert_eq!(out.decision, Decision::Block);
    assert!(out.reason_codes.contains(&REASON_ML_SCORE_MISSING.to_string()));
}

#[test]
fn thresholds_are_inclusive_at_lower_bound() {
    let mut p = policy();
    p.ml_weight = 1.0;
    p.trust_weight = 0.0;
    let at = |m: f64| decide(&p, &flags(&[]), Some(m), 0.5).unwrap().decision;
    assert_eq!(at(0.29), Decision::Allow);
    assert_eq!(at(0.3), Decision::Review);
    assert_eq!(at(0.59), Decision::Review);
    assert_eq!(at(0.6), Decision::Block);
    assert_eq!(at(1.0), Decision::Block);
}

/// Decisions never get softer as combined risk grows.
#[test]
fn decision_is_monotonic_in_combined_risk() {
    let p = policy();
    let mut outcomes = Vec::new();
    for mi in 0..=20 {
        for ti in 0..=20 {
            let m = mi as f64 / 20.0;
            let t = ti as f64 / 20.0;
            let out = decide(&p, &flags(&[]), Some(m), t).unwrap();
            outcomes.push((out.combined_risk.unwrap(), out.decision));
        }
    }
    outcomes.sort_by(|a, b| a.0.total_cmp(&b.0));
    for w in outcomes.windows(2) {
        assert!(
            w[0].1 <= w[1].1,
            "combined {} -> {:?} but {} -> {:?}",
            w[0].0, w[0].1, w[1].0, w[1].1
        );
    }
}

#[test]
fn out_of_range_inputs_are_rejected() {
    let p = policy();
    let none = flags(&[]);
    assert!(matches!(
        decide(&p, &none, Some(0.5), 1.2),
        Err(DeskError::OutOfRange { field: "trust_score", .. })
    ));
    assert!(matches!(
        decide(&p, &none, Some(-0.1), 0.5),
        Err(DeskError::OutOfRange { field: "ml_score", .. })
    ));
    assert!(matches!(
        decide(&p, &none, Some(f64::NAN), 0.5),
        Err(DeskError::OutOfRange { .. })
    ));
    // Critical flags do not bypass validation.
    assert!(decide(&p, &flags(&[RuleFlag::SanctionedCorridor]), Some(0.5), f64::INFINITY).is_err());
}

#[test]
fn invalid_policies_are_refused() {
    let mut inverted = policy();
    inverted.review_threshold = 0.6;
    inverted.block_threshold = 0.3;
    assert!(matches!(DecisionEngine::new(inverted), Err(DeskError::InvalidPolicy(_))));

    let mut weightless = policy();
    weightless.ml_weight = 0.0;
    weightless.trust_weight = 0.0;
    assert!(matches!(DecisionEngine::new(weightless), Err(DeskError::InvalidPolicy(_))));

    let mut negative = policy();
    negative.trust_weight = -0.1;
    assert!(negative.validate().is_err());

    let mut above_one = policy();
    above_one.block_threshold = 1.5;
    assert!(above_one.validate().is_err());
}

#[test]
fn policy_loads_from_json() {
    let json = r#"{
        "review_threshold": 0.25,
        "block_threshold": 0.7,
        "ml_weight": 0.6,
        "trust_weight": 0.4,
        "flag_severity": { "velocity_spike": "escalate", "sanctioned_corridor": "critical" }
    }"#;
    let p: DecisionPolicy = serde_json::from_str(json).unwrap();
    let engine = DecisionEngine::new(p).unwrap();
    assert_eq!(engine.policy().severity_of(RuleFlag::VelocitySpike), FlagSeverity::Escalate);
    assert_eq!(engine.policy().severity_of(RuleFlag::HighAmount), FlagSeverity::Info);

    let out = engine.decide(&flags(&[RuleFlag::VelocitySpike]), Some(0.05), 0.95).unwrap();
    assert_eq!(out.decision, Decision::Review);
}

#[test]
fn decision_labels_parse_case_insensitively() {
    assert_eq!("allow".parse::<Decision>().unwrap(), Decision::Allow);
    assert_eq!(" BLOCK ".parse::<Decision>().unwrap(), Decision::Block);
    assert!("approve".parse::<Decision>().is_err());
    assert_eq!(Decision::Review.to_string(), "REVIEW");
}
