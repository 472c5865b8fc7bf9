//! Signal extractor: rule-based risk flags per transaction.
//!
//! The extractor keeps a small per-customer history across months:
//! corridors the customer has successfully used, and recent attempt
//! timestamps for the velocity window. Extraction is read-only;
//! `observe()` folds a decided transaction back into the history.
//!
//! A customer's first successful corridor is the baseline, so the very
//! first transaction never raises NEW_CORRIDOR.

use crate::{
    config::{CorridorConfig, SignalConfig},
    decision::Decision,
    record::{CustomerProfile, TransactionRecord},
    types::{CountryCode, EntityId},
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleFlag {
    NewCorridor,
    DeviceChange,
    VelocitySpike,
    HighAmount,
    HighRiskCorridor,
    SanctionedCorridor,
    NewCustomer,
}

impl RuleFlag {
    pub const ALL: [RuleFlag; 7] = [
        RuleFlag::NewCorridor,
        RuleFlag::DeviceChange,
        RuleFlag::VelocitySpike,
        RuleFlag::HighAmount,
        RuleFlag::HighRiskCorridor,
        RuleFlag::SanctionedCorridor,
        RuleFlag::NewCustomer,
    ];

    /// Stable reason code written to the output tables.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NewCorridor => "NEW_CORRIDOR",
            Self::DeviceChange => "DEVICE_CHANGE",
            Self::VelocitySpike => "VELOCITY_SPIKE",
            Self::HighAmount => "HIGH_AMOUNT",
            Self::HighRiskCorridor => "HIGH_RISK_CORRIDOR",
            Self::SanctionedCorridor => "SANCTIONED_CORRIDOR",
            Self::NewCustomer => "NEW_CUSTOMER",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.code() == code)
    }
}

/// Flags plus the raw measurements the ML provider also consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalReport {
    pub flags: BTreeSet<RuleFlag>,
    /// Attempts in the velocity window, this one included.
    pub velocity_count: usize,
    pub tenure_days: i64,
    pub corridor_base_risk: f64,
}

#[derive(Debug, Clone, Default)]
struct CustomerHistory {
    known_corridors: BTreeSet<CountryCode>,
    recent: VecDeque<chrono::NaiveDateTime>,
}

#[derive(Clone)]
pub struct SignalExtractor {
    config: SignalConfig,
    corridors: HashMap<CountryCode, CorridorConfig>,
    history: HashMap<EntityId, CustomerHistory>,
}

impl SignalExtractor {
    pub fn new(config: SignalConfig, corridors: &[CorridorConfig]) -> Self {
        Self {
            config,
            corridors: corridors
                .iter()
                .map(|c| (c.destination.clone(), c.clone()))
                .collect(),
            history: HashMap::new(),
        }
    }

    /// Derive flags for `txn`. Transactions must be fed in timestamp
    /// order per customer for the velocity window to be meaningful.
    pub fn extract(&self, customer: &CustomerProfile, txn: &TransactionRecord) -> SignalReport {
        let mut flags = BTreeSet::new();
        let history = self.history.get(&txn.customer_id);

        if let Some(h) = history {
            if !h.known_corridors.is_empty() && !h.known_corridors.contains(&txn.destination_country) {
                flags.insert(RuleFlag::NewCorridor);
            }
        }

        if txn.device_changed {
            flags.insert(RuleFlag::DeviceChange);
        }

        let window_start = txn.transaction_timestamp - Duration::hours(self.config.velocity_window_hours);
        let prior_in_window = history
            .map(|h| {
                h.recent
                    .iter()
                    .filter(|ts| **ts >= window_start && **ts <= txn.transaction_timestamp)
                    .count()
            })
            .unwrap_or(0);
        let velocity_count = prior_in_window + 1;
        if velocity_count >= self.config.velocity_max_txns {
            flags.insert(RuleFlag::VelocitySpike);
        }

        if txn.transaction_amount >= self.config.high_amount_threshold {
            flags.insert(RuleFlag::HighAmount);
        }

        let corridor = self.corridors.get(&txn.destination_country);
        if corridor.is_some_and(|c| c.high_risk) {
            flags.insert(RuleFlag::HighRiskCorridor);
        }
        if corridor.is_some_and(|c| c.sanctioned) {
            flags.insert(RuleFlag::SanctionedCorridor);
        }

        let tenure_days = (txn.transaction_timestamp.date() - customer.onboarding_date).num_days();
        if tenure_days < self.config.new_customer_days {
            flags.insert(RuleFlag::NewCustomer);
        }

        SignalReport {
            flags,
            velocity_count,
            tenure_days: tenure_days.max(0),
            // Unknown corridors carry full prior risk.
            corridor_base_risk: corridor.map(|c| c.base_risk).unwrap_or(1.0),
        }
    }

    /// Record a decided transaction. Every attempt counts toward
    /// velocity; only non-blocked transactions teach a corridor.
    pub fn observe(&mut self, txn: &TransactionRecord, decision: Decision) {
        let h = self.history.entry(txn.customer_id.clone()).or_default();
        let horizon = txn.transaction_timestamp - Duration::hours(self.config.velocity_window_hours);
        while h.recent.front().is_some_and(|ts| *ts < horizon) {
            h.recent.pop_front();
        }
        h.recent.push_back(txn.transaction_timestamp);
        if decision != Decision::Block {
            h.known_corridors.insert(txn.destination_country.clone());
        }
    }

    pub fn known_corridors(&self, customer_id: &str) -> Option<&BTreeSet<CountryCode>> {
        self.history.get(customer_id).map(|h| &h.known_corridors)
    }
}
