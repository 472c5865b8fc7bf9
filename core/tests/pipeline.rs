//! End-to-end batch scoring: registration, per-record rejection,
//! month close, persisted run ledger.

use chrono::{NaiveDate, NaiveDateTime};
use riskdesk_core::{
    clock::Period,
    config::DeskConfig,
    decision::Decision,
    engine::DeskEngine,
    error::DeskError,
    ml::{MlFeatures, RiskScorer},
    record::{CustomerProfile, TransactionRecord},
    store::DeskStore,
};

fn jan() -> Period {
    Period::new(2025, 1).unwrap()
}

fn customer(id: &str, trust: f64) -> CustomerProfile {
    CustomerProfile {
        customer_id: id.into(),
        onboarding_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        historical_txn_count: 40,
        trust_score: trust,
    }
}

fn ts(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
}

fn txn(id: &str, customer: &str, at: &str, dest: &str, ml: Option<f64>) -> TransactionRecord {
    TransactionRecord {
        transaction_id: id.into(),
        customer_id: customer.into(),
        transaction_timestamp: ts(at),
        source_country: "IN".into(),
        destination_country: dest.into(),
        transaction_amount: 500.0,
        device_changed: false,
        ml_risk_score: ml,
    }
}

fn engine(run_id: &str) -> DeskEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    DeskEngine::build_test(run_id.into(), 1).unwrap()
}

/// A full synthetic run scores every generated transaction exactly once.
#[test]
fn synthetic_run_scores_every_transaction() {
    let mut engine = engine("pipe-full-test");
    let summaries = engine.run_synthetic(jan(), 3).unwrap();

    assert_eq!(summaries.len(), 3);
    assert_eq!(engine.clock.periods_closed, 3);
    assert_eq!(engine.customer_count(), 50);

    let scored: usize = summaries.iter().map(|s| s.scored.len()).sum();
    assert!(scored > 0);
    assert_eq!(engine.store.scored_count("pipe-full-test").unwrap(), scored as i64);

    for s in &summaries {
        assert!(s.rejections.is_empty(), "{}: {:?}", s.period, s.rejections);
        assert_eq!(s.decisions.total(), s.scored.len() as u64);
        assert_eq!(s.trust_updates, 50, "every customer gets a month-close row");
        let stored = engine.store.decision_counts("pipe-full-test", s.period).unwrap();
        assert_eq!(stored, s.decisions);
        let rows = engine.store.scored_for_period("pipe-full-test", s.period).unwrap();
        assert_eq!(rows, s.scored, "persisted table matches what was returned");
        for row in &s.scored {
            assert!(s.period.contains(row.transaction_timestamp));
            assert!((0.0..=1.0).contains(&row.trust_score));
        }
    }

    let history = engine.store.trust_history("pipe-full-test", "c-000000").unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].period, jan());
    assert_eq!(history[1].previous, history[0].updated);

    assert_eq!(engine.store.event_count("pipe-full-test", "period_closed").unwrap(), 3);
    assert_eq!(
        engine.store.event_count("pipe-full-test", "transaction_decided").unwrap(),
        scored as i64
    );
}

#[test]
fn risky_population_surfaces_reviews_or_blocks() {
    let mut engine = DeskEngine::build_test("pipe-mix-test".into(), 2024).unwrap();
    let summaries = engine.run_synthetic(jan(), 3).unwrap();
    let allow: u64 = summaries.iter().map(|s| s.decisions.allow).sum();
    let review: u64 = summaries.iter().map(|s| s.decisions.review).sum();
    let block: u64 = summaries.iter().map(|s| s.decisions.block).sum();
    assert!(allow > review, "most traffic should be clean: {allow}/{review}/{block}");
    assert!(review + block > 0, "risky customers should surface: {allow}/{review}/{block}");
}

#[test]
fn invalid_records_are_rejected_and_the_rest_scored() {
    let mut engine = engine("pipe-reject-test");
    engine.register_customers(vec![customer("c-1", 0.8)]).unwrap();

    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-ok", "c-1", "2025-01-02 09:00:00", "AE", Some(0.1)),
                txn("t-ghost", "c-404", "2025-01-02 10:00:00", "AE", Some(0.1)),
                txn("t-feb", "c-1", "2025-02-01 00:00:00", "AE", Some(0.1)),
                txn("t-bad-ml", "c-1", "2025-01-03 10:00:00", "AE", Some(1.7)),
                txn("t-ok", "c-1", "2025-01-04 10:00:00", "AE", Some(0.1)),
            ],
        )
        .unwrap();

    assert_eq!(summary.scored.len(), 1);
    assert_eq!(summary.scored[0].transaction_id, "t-ok");
    let rejected: Vec<&str> = summary.rejections.iter().map(|r| r.record.as_str()).collect();
    assert_eq!(rejected, vec!["t-ghost", "t-bad-ml", "t-ok", "t-feb"]);
    assert!(summary.rejections[0].reason.contains("unknown customer"));
    assert!(summary.rejections[2].reason.contains("duplicate"));
    assert!(summary.rejections[3].reason.contains("outside period"));

    assert_eq!(engine.store.rejection_count("pipe-reject-test").unwrap(), 4);
    assert_eq!(engine.store.event_count("pipe-reject-test", "record_rejected").unwrap(), 4);
}

#[test]
fn invalid_customers_are_rejected_at_registration() {
    let mut engine = engine("pipe-cust-test");
    let rejected = engine
        .register_customers(vec![customer("c-1", 0.5), customer("c-1", 0.6), customer("c-2", 1.4)])
        .unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(engine.customer_count(), 1);
    assert_eq!(engine.trust_of("c-1"), Some(0.5));
    assert_eq!(engine.store.customer_count("pipe-cust-test").unwrap(), 1);
}

/// Every decision in a month sees the trust as of the previous close.
#[test]
fn trust_moves_only_at_month_close() {
    let mut engine = engine("pipe-trust-test");
    engine.register_customers(vec![customer("c-1", 0.5)]).unwrap();

    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-1", "c-1", "2025-01-02 09:00:00", "AE", Some(0.1)),
                txn("t-2", "c-1", "2025-01-20 09:00:00", "AE", Some(0.1)),
            ],
        )
        .unwrap();

    assert!(summary.scored.iter().all(|r| r.decision == Decision::Allow));
    assert!(summary.scored.iter().all(|r| r.trust_score == 0.5));
    let after = engine.trust_of("c-1").unwrap();
    assert!((after - 0.65).abs() < 1e-9, "got {after}");

    let stored = engine.store.get_customer("pipe-trust-test", "c-1").unwrap().unwrap();
    assert!((stored.trust_score - 0.65).abs() < 1e-9);
    assert_eq!(stored.historical_txn_count, 42);

    let feb = engine
        .score_period(jan().next(), vec![txn("t-3", "c-1", "2025-02-02 09:00:00", "AE", Some(0.1))])
        .unwrap();
    assert!((feb.scored[0].trust_score - 0.65).abs() < 1e-9);
}

/// combined = 0.7·0.35 + 0.3·(1 − 0.4) = 0.425, inside the REVIEW band.
#[test]
fn review_month_lowers_trust_at_close() {
    let mut engine = engine("pipe-review-trust-test");
    engine.register_customers(vec![customer("c-1", 0.4)]).unwrap();
    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-1", "c-1", "2025-01-02 09:00:00", "AE", Some(0.35)),
                txn("t-2", "c-1", "2025-01-12 09:00:00", "AE", Some(0.35)),
            ],
        )
        .unwrap();

    assert!(summary.scored.iter().all(|r| r.decision == Decision::Review));
    let after = engine.trust_of("c-1").unwrap();
    assert!(after < 0.4, "review month raised trust: 0.4 -> {after}");

    let history = engine.store.trust_history("pipe-review-trust-test", "c-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous, 0.4);
    assert_eq!(history[0].updated, after);
    assert_eq!(history[0].outcomes.review, 2);
    assert_eq!(history[0].outcomes.allow, 0);
}

#[test]
fn block_month_lowers_trust_at_close() {
    let mut engine = engine("pipe-block-trust-test");
    engine.register_customers(vec![customer("c-1", 0.3)]).unwrap();
    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-1", "c-1", "2025-01-02 09:00:00", "KP", Some(0.05)),
                txn("t-2", "c-1", "2025-01-12 09:00:00", "KP", Some(0.05)),
            ],
        )
        .unwrap();

    assert!(summary.scored.iter().all(|r| r.decision == Decision::Block));
    let after = engine.trust_of("c-1").unwrap();
    assert!(after < 0.3, "block month raised trust: 0.3 -> {after}");

    let history = engine.store.trust_history("pipe-block-trust-test", "c-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].previous, 0.3);
    assert_eq!(history[0].updated, after);
    assert_eq!(history[0].outcomes.block, 2);
}

/// A store failure mid-period rolls back the ledger and the engine's
/// in-memory state together, so the same period can be scored again.
#[test]
fn failed_period_is_rolled_back_and_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("desk.db");
    let path = path.to_str().unwrap();
    let store = DeskStore::open(path).unwrap();
    store.migrate().unwrap();
    store.insert_run("pipe-retry-test", 1, "test").unwrap();
    let mut engine = DeskEngine::new("pipe-retry-test".into(), 1, DeskConfig::default_test(), store).unwrap();
    engine.register_customers(vec![customer("c-1", 0.5)]).unwrap();

    let side = rusqlite::Connection::open(path).unwrap();
    side.execute_batch(
        "CREATE TRIGGER fail_second BEFORE INSERT ON scored_transaction
         WHEN NEW.transaction_id = 't-2'
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
    )
    .unwrap();

    let month = || {
        vec![
            txn("t-1", "c-1", "2025-01-02 09:00:00", "AE", Some(0.1)),
            txn("t-2", "c-1", "2025-01-12 09:00:00", "US", Some(0.1)),
        ]
    };

    assert!(engine.score_period(jan(), month()).is_err());
    assert_eq!(engine.clock.open, None);
    assert_eq!(engine.clock.last_closed, None);
    assert_eq!(engine.clock.periods_closed, 0);
    assert_eq!(engine.trust_of("c-1"), Some(0.5));
    assert_eq!(engine.customer("c-1").unwrap().historical_txn_count, 40);
    assert_eq!(engine.store.scored_count("pipe-retry-test").unwrap(), 0);
    assert_eq!(engine.store.event_count("pipe-retry-test", "transaction_decided").unwrap(), 0);
    assert!(engine.store.trust_history("pipe-retry-test", "c-1").unwrap().is_empty());

    side.execute_batch("DROP TRIGGER fail_second;").unwrap();
    let summary = engine.score_period(jan(), month()).unwrap();

    assert!(summary.rejections.is_empty(), "t-1 is not a duplicate: {:?}", summary.rejections);
    assert_eq!(summary.scored.len(), 2);
    let codes: Vec<Vec<&str>> = summary.scored.iter().map(|r| r.reason_codes().collect()).collect();
    assert!(codes[0].is_empty(), "first corridor is the baseline: {:?}", codes[0]);
    assert_eq!(codes[1], vec!["NEW_CORRIDOR"]);
    assert_eq!(engine.clock.periods_closed, 1);
    assert_eq!(engine.customer("c-1").unwrap().historical_txn_count, 42);
    assert_eq!(engine.store.scored_count("pipe-retry-test").unwrap(), 2);
    assert_eq!(engine.store.trust_history("pipe-retry-test", "c-1").unwrap().len(), 1);
}

#[test]
fn periods_must_advance() {
    let mut engine = engine("pipe-order-test");
    engine.register_customers(vec![customer("c-1", 0.5)]).unwrap();
    engine.score_period(jan().next(), vec![]).unwrap();

    let err = engine.score_period(jan(), vec![]).unwrap_err();
    assert!(matches!(err, DeskError::PeriodOutOfOrder { .. }), "got {err}");
    let again = engine.score_period(jan().next(), vec![]).unwrap_err();
    assert!(matches!(again, DeskError::PeriodOutOfOrder { .. }));
}

#[test]
fn sanctioned_corridor_is_blocked_outright() {
    let mut engine = engine("pipe-sanction-test");
    engine.register_customers(vec![customer("c-1", 0.95)]).unwrap();
    let summary = engine
        .score_period(jan(), vec![txn("t-1", "c-1", "2025-01-02 09:00:00", "KP", Some(0.01))])
        .unwrap();

    let row = &summary.scored[0];
    assert_eq!(row.decision, Decision::Block);
    assert_eq!(row.combined_risk, None);
    assert!(row.reason_codes().any(|c| c == "SANCTIONED_CORRIDOR"));
}

#[test]
fn signals_accumulate_across_transactions() {
    let mut engine = engine("pipe-signal-test");
    engine.register_customers(vec![customer("c-1", 0.9)]).unwrap();
    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-1", "c-1", "2025-01-02 09:00:00", "AE", Some(0.05)),
                txn("t-2", "c-1", "2025-01-02 09:10:00", "US", Some(0.05)),
                txn("t-3", "c-1", "2025-01-02 09:20:00", "US", Some(0.05)),
            ],
        )
        .unwrap();

    let codes: Vec<Vec<&str>> = summary.scored.iter().map(|r| r.reason_codes().collect()).collect();
    assert!(codes[0].is_empty(), "first corridor is the baseline: {:?}", codes[0]);
    assert_eq!(codes[1], vec!["NEW_CORRIDOR"]);
    assert_eq!(codes[2], vec!["VELOCITY_SPIKE"]);
}

struct Unavailable;

impl RiskScorer for Unavailable {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn score(&self, _features: &MlFeatures) -> Option<f64> {
        None
    }
}

/// With no score from the provider the engine fails safe; an input
/// score still wins over the provider.
#[test]
fn missing_provider_score_fails_safe() {
    let mut engine = engine("pipe-noml-test").with_scorer(Box::new(Unavailable));
    engine.register_customers(vec![customer("c-1", 0.9)]).unwrap();
    let summary = engine
        .score_period(
            jan(),
            vec![
                txn("t-1", "c-1", "2025-01-02 09:00:00", "AE", None),
                txn("t-2", "c-1", "2025-01-05 09:00:00", "AE", Some(0.1)),
            ],
        )
        .unwrap();

    let first = &summary.scored[0];
    assert_eq!(first.ml_risk_score, None);
    assert_eq!(first.decision, Decision::Block);
    assert!(first.reason_codes().any(|c| c == "ML_SCORE_MISSING"));

    let second = &summary.scored[1];
    assert_eq!(second.ml_risk_score, Some(0.1));
    assert_eq!(second.decision, Decision::Allow);
}
