//! The batch engine: scores one monitoring period at a time.
//!
//! EXECUTION ORDER per period (fixed, documented, never reordered):
//!   1. Open the period on the clock (strictly increasing periods).
//!   2. Sort the period's transactions by (timestamp, id).
//!   3. Per transaction: validate → signals → ML score → trust
//!      snapshot → decision → persist. Invalid records are rejected
//!      and reported; processing continues.
//!   4. Close the period: the trust tracker applies the month's
//!      outcomes once, and customers are written back.
//!   5. Commit. If any write fails, the batch is rolled back and the
//!      in-memory state is restored to how it was before step 1.
//!
//! RULES:
//!   - Trust never moves mid-period; every decision in a period sees
//!     the trust score as of the previous close.
//!   - All randomness flows through the RngBank (generator only).
//!   - All state changes are recorded in the event log.

use crate::{
    clock::{Period, PeriodClock},
    config::DeskConfig,
    decision::DecisionEngine,
    error::{DeskError, DeskResult},
    event::{DeskEvent, EventLogEntry},
    generator::generate_dataset,
    ml::{LogisticScorer, MlFeatures, RiskScorer},
    monitoring::DecisionShares,
    record::{join_reason_codes, CustomerProfile, RecordRejection, ScoredTransaction, TransactionRecord},
    signals::SignalExtractor,
    store::DeskStore,
    trust::{MonthOutcomes, TrustTracker},
    types::{EntityId, RunId},
};
use std::collections::{BTreeMap, HashSet};

/// In-memory state a failed period must not leave behind.
struct Checkpoint {
    clock:     PeriodClock,
    signals:   SignalExtractor,
    trust:     TrustTracker,
    customers: BTreeMap<EntityId, CustomerProfile>,
    seen_txns: HashSet<EntityId>,
}

/// What one period produced.
#[derive(Debug, Clone)]
pub struct PeriodSummary {
    pub period: Period,
    pub scored: Vec<ScoredTransaction>,
    pub rejections: Vec<RecordRejection>,
    pub decisions: DecisionShares,
    pub trust_updates: usize,
}

pub struct DeskEngine {
    pub run_id: RunId,
    pub clock:  PeriodClock,
    pub store:  DeskStore,
    seed:        u64,
    config:      DeskConfig,
    decisions:   DecisionEngine,
    signals:     SignalExtractor,
    scorer:      Box<dyn RiskScorer>,
    trust:       TrustTracker,
    customers:   BTreeMap<EntityId, CustomerProfile>,
    seen_txns:   HashSet<EntityId>,
    initialized: bool,
}

impl DeskEngine {
    /// Build an engine over an already-migrated store that holds
    /// the run record for `run_id`.
    pub fn new(run_id: RunId, seed: u64, config: DeskConfig, store: DeskStore) -> DeskResult<Self> {
        let decisions = DecisionEngine::new(config.policy.clone())?;
        let signals = SignalExtractor::new(config.signals.clone(), &config.corridors);
        let scorer: Box<dyn RiskScorer> = Box::new(LogisticScorer::new(config.ml_model.clone()));
        let trust = TrustTracker::new(config.trust.clone());
        Ok(Self {
            clock: PeriodClock::new(run_id.clone()),
            run_id,
            store,
            seed,
            config,
            decisions,
            signals,
            scorer,
            trust,
            customers: BTreeMap::new(),
            seen_txns: HashSet::new(),
            initialized: false,
        })
    }

    /// In-memory engine over `DeskConfig::default_test()`.
    pub fn build_test(run_id: RunId, seed: u64) -> DeskResult<Self> {
        Self::build_test_with(run_id, seed, DeskConfig::default_test())
    }

    pub fn build_test_with(run_id: RunId, seed: u64, config: DeskConfig) -> DeskResult<Self> {
        let store = DeskStore::in_memory()?;
        store.migrate()?;
        store.insert_run(&run_id, seed, "0.1.0-test")?;
        Self::new(run_id, seed, config, store)
    }

    /// Swap the ML score provider.
    pub fn with_scorer(mut self, scorer: Box<dyn RiskScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn trust_of(&self, customer_id: &str) -> Option<f64> {
        self.trust.trust_of(customer_id)
    }

    pub fn customer(&self, customer_id: &str) -> Option<&CustomerProfile> {
        self.customers.get(customer_id)
    }

    pub fn customer_count(&self) -> usize {
        self.customers.len()
    }

    fn emit(&self, period: Option<Period>, stage: &str, event: &DeskEvent) -> DeskResult<()> {
        let entry = EventLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            period:     period.map(|p| p.label()).unwrap_or_default(),
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.store.append_event(&entry)
    }

    fn ensure_initialized(&mut self) -> DeskResult<()> {
        if !self.initialized {
            self.initialized = true;
            let event = DeskEvent::RunInitialized {
                run_id: self.run_id.clone(),
                seed: self.seed,
                model: self.scorer.name().to_string(),
            };
            self.emit(None, "engine", &event)?;
        }
        Ok(())
    }

    fn reject(&self, period: Option<Period>, rejection: RecordRejection) -> DeskResult<RecordRejection> {
        log::warn!(
            "{}: rejected {}: {}",
            period.map(|p| p.label()).unwrap_or_else(|| "customers".into()),
            rejection.record,
            rejection.reason
        );
        self.store.insert_rejection(&self.run_id, period, &rejection)?;
        self.emit(
            period,
            "validation",
            &DeskEvent::RecordRejected {
                period,
                record: rejection.record.clone(),
                reason: rejection.reason.clone(),
            },
        )?;
        Ok(rejection)
    }

    /// Persist rejections found before the engine saw the records,
    /// e.g. rows the table reader could not parse.
    pub fn record_rejections(&mut self, period: Option<Period>, rejections: &[RecordRejection]) -> DeskResult<()> {
        self.ensure_initialized()?;
        for rejection in rejections {
            self.store.insert_rejection(&self.run_id, period, rejection)?;
            self.emit(
                period,
                "validation",
                &DeskEvent::RecordRejected {
                    period,
                    record: rejection.record.clone(),
                    reason: rejection.reason.clone(),
                },
            )?;
        }
        Ok(())
    }

    /// Register customer profiles. Invalid or duplicate profiles are
    /// rejected and returned; the rest start being tracked.
    pub fn register_customers(&mut self, profiles: Vec<CustomerProfile>) -> DeskResult<Vec<RecordRejection>> {
        self.ensure_initialized()?;
        let mut rejections = Vec::new();
        let mut registered = 0usize;

        for profile in profiles {
            let checked = profile.validate().and_then(|_| {
                if self.customers.contains_key(&profile.customer_id) {
                    Err(DeskError::validation(&profile.customer_id, "duplicate customer_id"))
                } else {
                    Ok(())
                }
            });
            if let Err(e) = checked {
                let rejection = RecordRejection::from_error(&profile.customer_id, None, &e);
                rejections.push(self.reject(None, rejection)?);
                continue;
            }
            self.trust.register(&profile.customer_id, profile.trust_score)?;
            self.store.insert_customer(&self.run_id, &profile)?;
            self.customers.insert(profile.customer_id.clone(), profile);
            registered += 1;
        }

        self.emit(None, "customer", &DeskEvent::CustomersRegistered { count: registered })?;
        log::info!("customer: registered {registered} customers ({} rejected)", rejections.len());
        Ok(rejections)
    }

    /// Score one period's transactions and close the period.
    pub fn score_period(
        &mut self,
        period: Period,
        transactions: Vec<TransactionRecord>,
    ) -> DeskResult<PeriodSummary> {
        self.ensure_initialized()?;
        self.clock.open(period)?;
        if let Err(e) = self.store.begin_batch() {
            self.clock.abort();
            return Err(e);
        }
        let checkpoint = self.checkpoint();
        let result = self
            .score_open_period(period, transactions)
            .and_then(|summary| self.store.commit_batch().map(|_| summary));
        if let Err(e) = &result {
            log::error!("{period}: scoring failed, rolling back: {e}");
            if let Err(rollback) = self.store.rollback_batch() {
                log::error!("{period}: rollback failed: {rollback}");
            }
            self.restore(checkpoint);
            self.clock.abort();
        }
        result
    }

    /// Taken with the period open and nothing yet scored.
    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            clock:     self.clock.clone(),
            signals:   self.signals.clone(),
            trust:     self.trust.clone(),
            customers: self.customers.clone(),
            seen_txns: self.seen_txns.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.clock = checkpoint.clock;
        self.signals = checkpoint.signals;
        self.trust = checkpoint.trust;
        self.customers = checkpoint.customers;
        self.seen_txns = checkpoint.seen_txns;
    }

    fn score_open_period(
        &mut self,
        period: Period,
        mut transactions: Vec<TransactionRecord>,
    ) -> DeskResult<PeriodSummary> {
        self.emit(
            Some(period),
            "engine",
            &DeskEvent::PeriodOpened {
                period,
                transactions_in: transactions.len(),
            },
        )?;

        transactions.sort_by(|a, b| {
            a.transaction_timestamp
                .cmp(&b.transaction_timestamp)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });

        let mut scored = Vec::with_capacity(transactions.len());
        let mut rejections = Vec::new();
        let mut outcomes: BTreeMap<EntityId, MonthOutcomes> = BTreeMap::new();

        for txn in transactions {
            let row = match self.score_one(period, &txn) {
                Ok(row) => row,
                Err(e) => {
                    let rejection = RecordRejection::from_error(&txn.transaction_id, None, &e);
                    rejections.push(self.reject(Some(period), rejection)?);
                    continue;
                }
            };

            self.signals.observe(&txn, row.decision);
            self.seen_txns.insert(row.transaction_id.clone());
            outcomes.entry(row.customer_id.clone()).or_default().record(row.decision);
            self.store.insert_scored(&self.run_id, period, &row)?;
            self.emit(
                Some(period),
                "decision",
                &DeskEvent::TransactionDecided {
                    period,
                    transaction_id: row.transaction_id.clone(),
                    customer_id: row.customer_id.clone(),
                    decision: row.decision,
                    combined_risk: row.combined_risk,
                },
            )?;
            scored.push(row);
        }

        let trust_updates = self.close_period(period, &outcomes)?;
        let decisions = DecisionShares::tally(scored.iter().map(|r| &r.decision));

        self.emit(
            Some(period),
            "engine",
            &DeskEvent::PeriodClosed {
                period,
                scored: decisions.total(),
                allow: decisions.allow,
                review: decisions.review,
                block: decisions.block,
                rejected: rejections.len() as u64,
            },
        )?;
        log::info!(
            "{period}: scored {} (allow={} review={} block={}), rejected {}",
            decisions.total(),
            decisions.allow,
            decisions.review,
            decisions.block,
            rejections.len()
        );

        Ok(PeriodSummary {
            period,
            scored,
            rejections,
            decisions,
            trust_updates,
        })
    }

    /// Validate and decide one transaction. Does not mutate state.
    fn score_one(&self, period: Period, txn: &TransactionRecord) -> DeskResult<ScoredTransaction> {
        txn.validate()?;
        let id = &txn.transaction_id;
        if !period.contains(txn.transaction_timestamp) {
            return Err(DeskError::validation(
                id,
                format!("timestamp {} is outside period {period}", txn.transaction_timestamp),
            ));
        }
        if self.seen_txns.contains(id) {
            return Err(DeskError::validation(id, "duplicate transaction_id"));
        }
        let customer = self
            .customers
            .get(&txn.customer_id)
            .ok_or_else(|| DeskError::validation(id, format!("unknown customer '{}'", txn.customer_id)))?;
        let trust_score = self
            .trust
            .trust_of(&txn.customer_id)
            .ok_or_else(|| DeskError::validation(id, "customer has no trust score"))?;

        let signals = self.signals.extract(customer, txn);
        let ml_score = txn
            .ml_risk_score
            .or_else(|| self.scorer.score(&MlFeatures::from_signals(txn, &signals)));
        let outcome = self.decisions.decide(&signals.flags, ml_score, trust_score)?;

        Ok(ScoredTransaction {
            transaction_id: txn.transaction_id.clone(),
            customer_id: txn.customer_id.clone(),
            transaction_timestamp: txn.transaction_timestamp,
            source_country: txn.source_country.clone(),
            destination_country: txn.destination_country.clone(),
            transaction_amount: txn.transaction_amount,
            device_changed: txn.device_changed,
            reason_codes_str: join_reason_codes(&outcome.reason_codes),
            ml_risk_score: ml_score,
            trust_score,
            combined_risk: outcome.combined_risk,
            decision: outcome.decision,
        })
    }

    fn close_period(
        &mut self,
        period: Period,
        outcomes: &BTreeMap<EntityId, MonthOutcomes>,
    ) -> DeskResult<usize> {
        let updates = self.trust.close_period(period, outcomes);
        for update in &updates {
            self.store.insert_trust_update(&self.run_id, update)?;
            if let Some(customer) = self.customers.get_mut(&update.customer_id) {
                customer.historical_txn_count += update.outcomes.total();
                self.store.update_customer_close(
                    &self.run_id,
                    &update.customer_id,
                    update.updated,
                    customer.historical_txn_count,
                )?;
            }
            if update.previous != update.updated {
                self.emit(
                    Some(period),
                    "trust",
                    &DeskEvent::TrustUpdated {
                        period,
                        customer_id: update.customer_id.clone(),
                        previous: update.previous,
                        updated: update.updated,
                    },
                )?;
            }
        }
        self.clock.close();
        Ok(updates.len())
    }

    /// Generate a synthetic dataset from the run seed and score every
    /// month of it.
    pub fn run_synthetic(&mut self, start: Period, months: u32) -> DeskResult<Vec<PeriodSummary>> {
        let dataset = generate_dataset(&self.config, self.seed, start, months);
        let rejected = self.register_customers(dataset.profiles())?;
        if !rejected.is_empty() {
            log::warn!("generator produced {} invalid customers", rejected.len());
        }
        dataset
            .months
            .into_iter()
            .map(|(period, txns)| self.score_period(period, txns))
            .collect()
    }
}
