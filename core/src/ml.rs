//! ML score provider.
//!
//! `RiskScorer` is the seam for a real model; the shipped provider is a
//! logistic stand-in whose coefficients live in `ml_model.json`.

use crate::{config::MlModelConfig, record::TransactionRecord, signals::{RuleFlag, SignalReport}};

/// Inputs available to any scorer.
#[derive(Debug, Clone, PartialEq)]
pub struct MlFeatures {
    pub amount: f64,
    pub corridor_base_risk: f64,
    pub device_changed: bool,
    pub new_corridor: bool,
    pub velocity_count: usize,
    pub tenure_days: i64,
}

impl MlFeatures {
    pub fn from_signals(txn: &TransactionRecord, signals: &SignalReport) -> Self {
        Self {
            amount: txn.transaction_amount,
            corridor_base_risk: signals.corridor_base_risk,
            device_changed: txn.device_changed,
            new_corridor: signals.flags.contains(&RuleFlag::NewCorridor),
            velocity_count: signals.velocity_count,
            tenure_days: signals.tenure_days,
        }
    }
}

/// Produces a probability-like risk score in [0, 1].
/// `None` means the scorer could not score; the decision engine
/// treats that as maximum risk.
pub trait RiskScorer {
    fn name(&self) -> &str;
    fn score(&self, features: &MlFeatures) -> Option<f64>;
}

pub struct LogisticScorer {
    model: MlModelConfig,
}

impl LogisticScorer {
    pub fn new(model: MlModelConfig) -> Self {
        Self { model }
    }

    fn logit(&self, f: &MlFeatures) -> f64 {
        let m = &self.model;
        let indicator = |b: bool| if b { 1.0 } else { 0.0 };
        m.intercept
            + m.coef_log_amount * f.amount.ln()
            + m.coef_corridor_risk * f.corridor_base_risk
            + m.coef_device_change * indicator(f.device_changed)
            + m.coef_new_corridor * indicator(f.new_corridor)
            // Only attempts beyond the first add velocity risk.
            + m.coef_velocity * f.velocity_count.saturating_sub(1) as f64
            + m.coef_tenure_years * (f.tenure_days as f64 / 365.0)
    }
}

impl RiskScorer for LogisticScorer {
    fn name(&self) -> &str {
        &self.model.model_version
    }

    fn score(&self, features: &MlFeatures) -> Option<f64> {
        if !(features.amount.is_finite() && features.amount > 0.0)
            || !features.corridor_base_risk.is_finite()
        {
            return None;
        }
        let z = self.logit(features);
        let p = 1.0 / (1.0 + (-z).exp());
        p.is_finite().then_some(p.clamp(0.0, 1.0))
    }
}
