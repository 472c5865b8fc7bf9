//! Row types of the input and output tables.
//!
//! Field names are the column names. Every record type exposes a
//! `validate()` that rejects, never coerces.

use crate::{
    decision::Decision,
    error::{DeskError, DeskResult},
    types::{CountryCode, EntityId},
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// `customers.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: EntityId,
    pub onboarding_date: NaiveDate,
    pub historical_txn_count: u64,
    pub trust_score: f64,
}

/// `transactions_YYYY_MM.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: EntityId,
    pub customer_id: EntityId,
    pub transaction_timestamp: NaiveDateTime,
    pub source_country: CountryCode,
    pub destination_country: CountryCode,
    pub transaction_amount: f64,
    pub device_changed: bool,
    /// Precomputed score; when present it takes precedence over the
    /// configured provider.
    #[serde(default)]
    pub ml_risk_score: Option<f64>,
}

/// `risk_scored_transactions_YYYY_MM.csv`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTransaction {
    pub transaction_id: EntityId,
    pub customer_id: EntityId,
    pub transaction_timestamp: NaiveDateTime,
    pub source_country: CountryCode,
    pub destination_country: CountryCode,
    pub transaction_amount: f64,
    pub device_changed: bool,
    /// Pipe-separated reason codes, e.g. `NEW_CORRIDOR|DEVICE_CHANGE`.
    pub reason_codes_str: String,
    pub ml_risk_score: Option<f64>,
    /// Trust snapshot at decision time.
    pub trust_score: f64,
    pub combined_risk: Option<f64>,
    pub decision: Decision,
}

impl ScoredTransaction {
    pub fn reason_codes(&self) -> impl Iterator<Item = &str> {
        self.reason_codes_str.split('|').filter(|s| !s.is_empty())
    }

    /// Fail-safe reading of the ML score: missing is maximum risk.
    pub fn ml_score_or_max(&self) -> f64 {
        self.ml_risk_score.unwrap_or(1.0)
    }
}

pub(crate) fn join_reason_codes(codes: &[String]) -> String {
    codes.join("|")
}

fn require_id(record: &str, field: &str, value: &str) -> DeskResult<()> {
    if value.trim().is_empty() {
        return Err(DeskError::validation(record, format!("{field} is empty")));
    }
    Ok(())
}

fn require_country(record: &str, field: &str, value: &str) -> DeskResult<()> {
    if value.len() != 2 || !value.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(DeskError::validation(
            record,
            format!("{field} '{value}' is not an ISO alpha-2 code"),
        ));
    }
    Ok(())
}

fn require_unit(record: &str, field: &str, value: f64) -> DeskResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(DeskError::validation(
            record,
            format!("{field} out of range [0, 1]: {value}"),
        ));
    }
    Ok(())
}

fn require_amount(record: &str, value: f64) -> DeskResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(DeskError::validation(
            record,
            format!("transaction_amount must be positive: {value}"),
        ));
    }
    Ok(())
}

impl CustomerProfile {
    pub fn validate(&self) -> DeskResult<()> {
        require_id(&self.customer_id, "customer_id", &self.customer_id)?;
        require_unit(&self.customer_id, "trust_score", self.trust_score)
    }
}

impl TransactionRecord {
    pub fn validate(&self) -> DeskResult<()> {
        let id = &self.transaction_id;
        require_id(id, "transaction_id", id)?;
        require_id(id, "customer_id", &self.customer_id)?;
        require_country(id, "source_country", &self.source_country)?;
        require_country(id, "destination_country", &self.destination_country)?;
        require_amount(id, self.transaction_amount)?;
        if let Some(m) = self.ml_risk_score {
            require_unit(id, "ml_risk_score", m)?;
        }
        Ok(())
    }
}

impl ScoredTransaction {
    pub fn validate(&self) -> DeskResult<()> {
        let id = &self.transaction_id;
        require_id(id, "transaction_id", id)?;
        require_id(id, "customer_id", &self.customer_id)?;
        require_country(id, "source_country", &self.source_country)?;
        require_country(id, "destination_country", &self.destination_country)?;
        require_amount(id, self.transaction_amount)?;
        require_unit(id, "trust_score", self.trust_score)?;
        if let Some(m) = self.ml_risk_score {
            require_unit(id, "ml_risk_score", m)?;
        }
        if let Some(c) = self.combined_risk {
            require_unit(id, "combined_risk", c)?;
        }
        Ok(())
    }
}

/// An input row that failed validation. Reported, not retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRejection {
    /// Record id when it could be read, else `line N`.
    pub record: String,
    /// 1-based line in the source table, when known.
    pub line: Option<u64>,
    pub reason: String,
}

impl RecordRejection {
    pub fn from_error(record: impl Into<String>, line: Option<u64>, err: &DeskError) -> Self {
        let reason = match err {
            DeskError::Validation { reason, .. } => reason.clone(),
            other => other.to_string(),
        };
        Self {
            record: record.into(),
            line,
            reason,
        }
    }
}
