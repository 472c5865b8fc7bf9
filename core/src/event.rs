//! The run's event log: every state change the engine makes.
//!
//! Events are appended in execution order and persisted as JSON.
//! Variants are added over time, never removed or reordered.

use crate::{
    clock::Period,
    decision::Decision,
    types::{EntityId, RunId},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeskEvent {
    // ── Engine events ──────────────────────────────
    RunInitialized {
        run_id: RunId,
        seed: u64,
        model: String,
    },
    PeriodOpened {
        period: Period,
        transactions_in: usize,
    },
    PeriodClosed {
        period: Period,
        scored: u64,
        allow: u64,
        review: u64,
        block: u64,
        rejected: u64,
    },

    // ── Customer events ────────────────────────────
    CustomersRegistered {
        count: usize,
    },
    TrustUpdated {
        period: Period,
        customer_id: EntityId,
        previous: f64,
        updated: f64,
    },

    // ── Decision events ────────────────────────────
    TransactionDecided {
        period: Period,
        transaction_id: EntityId,
        customer_id: EntityId,
        decision: Decision,
        combined_risk: Option<f64>,
    },
    RecordRejected {
        period: Option<Period>,
        record: String,
        reason: String,
    },
}

impl DeskEvent {
    /// Stable string name, stored in the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunInitialized { .. }      => "run_initialized",
            Self::PeriodOpened { .. }        => "period_opened",
            Self::PeriodClosed { .. }        => "period_closed",
            Self::CustomersRegistered { .. } => "customers_registered",
            Self::TrustUpdated { .. }        => "trust_updated",
            Self::TransactionDecided { .. }  => "transaction_decided",
            Self::RecordRejected { .. }      => "record_rejected",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id:         Option<i64>,
    pub run_id:     RunId,
    /// Period label, or empty for run-level events.
    pub period:     String,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String, // JSON-serialized DeskEvent
}
