//! Trust score tracker: sole owner of per-customer trust.
//!
//! Trust moves once per closed period, never mid-month:
//!   q    = allow / n
//!   step = clamp(smoothing·(q − prev), ±max_step)
//!   new  = clamp(prev + step − review_penalty·review − block_penalty·block, 0, 1)
//! A month without transactions leaves trust unchanged. A month with
//! no ALLOW outcome never raises it.
//! Closing a period a customer has already closed is a no-op.

use crate::{
    clock::Period,
    config::TrustConfig,
    decision::Decision,
    error::{DeskError, DeskResult},
    types::EntityId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decision counts for one customer in one period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthOutcomes {
    pub allow: u64,
    pub review: u64,
    pub block: u64,
}

impl MonthOutcomes {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Allow => self.allow += 1,
            Decision::Review => self.review += 1,
            Decision::Block => self.block += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.allow + self.review + self.block
    }

    pub fn count(&self, decision: Decision) -> u64 {
        match decision {
            Decision::Allow => self.allow,
            Decision::Review => self.review,
            Decision::Block => self.block,
        }
    }
}

/// Pure monthly update. Same inputs, same output.
pub fn updated_trust(config: &TrustConfig, previous: f64, outcomes: &MonthOutcomes) -> f64 {
    let n = outcomes.total();
    if n == 0 {
        return previous;
    }
    let quality = outcomes.allow as f64 / n as f64;
    let step = (config.smoothing * (quality - previous)).clamp(-config.max_step, config.max_step);
    let penalty = config.review_penalty * outcomes.review as f64
        + config.block_penalty * outcomes.block as f64;
    (previous + step - penalty).clamp(0.0, 1.0)
}

/// Starting trust for a customer, from tenure and prior activity.
pub fn initial_trust(config: &TrustConfig, tenure_days: i64, historical_txn_count: u64) -> f64 {
    let tenure = (tenure_days.max(0) as f64 / config.tenure_saturation_days).min(1.0);
    let history = (historical_txn_count as f64 / config.history_saturation).min(1.0);
    (config.initial_base
        + config.initial_tenure_weight * tenure
        + config.initial_history_weight * history)
        .clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustUpdate {
    pub customer_id: EntityId,
    pub period: Period,
    pub previous: f64,
    pub updated: f64,
    pub outcomes: MonthOutcomes,
}

#[derive(Debug, Clone)]
struct TrustState {
    score: f64,
    last_closed: Option<Period>,
}

#[derive(Clone)]
pub struct TrustTracker {
    config: TrustConfig,
    states: BTreeMap<EntityId, TrustState>,
}

impl TrustTracker {
    pub fn new(config: TrustConfig) -> Self {
        Self {
            config,
            states: BTreeMap::new(),
        }
    }

    /// Start tracking a customer. Re-registering keeps the current score.
    pub fn register(&mut self, customer_id: &str, initial: f64) -> DeskResult<()> {
        if !initial.is_finite() || !(0.0..=1.0).contains(&initial) {
            return Err(DeskError::OutOfRange {
                field: "trust_score",
                value: initial,
            });
        }
        self.states
            .entry(customer_id.to_string())
            .or_insert(TrustState {
                score: initial,
                last_closed: None,
            });
        Ok(())
    }

    pub fn trust_of(&self, customer_id: &str) -> Option<f64> {
        self.states.get(customer_id).map(|s| s.score)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Apply a period's outcomes to every tracked customer.
    /// Customers absent from `outcomes` had no transactions.
    /// Returns one update per customer whose period was not yet closed.
    pub fn close_period(
        &mut self,
        period: Period,
        outcomes: &BTreeMap<EntityId, MonthOutcomes>,
    ) -> Vec<TrustUpdate> {
        let mut updates = Vec::new();
        for (customer_id, state) in self.states.iter_mut() {
            if state.last_closed.is_some_and(|last| last >= period) {
                continue;
            }
            let month = outcomes.get(customer_id).copied().unwrap_or_default();
            let previous = state.score;
            state.score = updated_trust(&self.config, previous, &month);
            state.last_closed = Some(period);
            updates.push(TrustUpdate {
                customer_id: customer_id.clone(),
                period,
                previous,
                updated: state.score,
                outcomes: month,
            });
        }
        updates
    }
}
