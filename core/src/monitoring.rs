//! Monitoring: per-month aggregation and month-over-month drift.
//!
//! Pure aggregation over immutable monthly tables; nothing here
//! mutates its input.

use crate::{
    clock::Period,
    decision::Decision,
    record::ScoredTransaction,
    types::CountryCode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub const ML_HISTOGRAM_BINS: usize = 10;
const PSI_EPSILON: f64 = 1e-4;
const PSI_MODERATE: f64 = 0.10;
const PSI_SIGNIFICANT: f64 = 0.25;

/// Decision counts with derived shares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionShares {
    pub allow: u64,
    pub review: u64,
    pub block: u64,
}

impl DecisionShares {
    pub fn tally<'a>(decisions: impl IntoIterator<Item = &'a Decision>) -> Self {
        let mut out = Self::default();
        for d in decisions {
            match d {
                Decision::Allow => out.allow += 1,
                Decision::Review => out.review += 1,
                Decision::Block => out.block += 1,
            }
        }
        out
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

    /// Fraction in [0, 1]; 0 for an empty tally.
    pub fn share(&self, decision: Decision) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.count(decision) as f64 / total as f64
        }
    }

    pub fn percent(&self, decision: Decision) -> f64 {
        self.share(decision) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReport {
    pub period: Period,
    pub transactions: u64,
    pub customers: u64,
    pub total_amount: f64,
    pub decisions: DecisionShares,
    /// Over scored rows only; None when no row carried a score.
    pub ml_mean: Option<f64>,
    pub ml_variance: Option<f64>,
    pub ml_missing: u64,
    pub ml_histogram: Vec<u64>,
    pub trust_mean: Option<f64>,
    /// Fraction of transaction count per destination; sums to 1.
    pub corridor_shares: BTreeMap<CountryCode, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftLevel {
    Stable,
    Moderate,
    Significant,
}

impl DriftLevel {
    pub fn from_psi(psi: f64) -> Self {
        if psi >= PSI_SIGNIFICANT {
            Self::Significant
        } else if psi >= PSI_MODERATE {
            Self::Moderate
        } else {
            Self::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub from: Period,
    pub to: Period,
    /// Change in share per decision (to − from).
    pub decision_share_delta: BTreeMap<Decision, f64>,
    pub ml_mean_delta: Option<f64>,
    pub corridor_psi: f64,
    pub ml_score_psi: f64,
    pub level: DriftLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringReport {
    pub months: Vec<MonthlyReport>,
    pub drift: Vec<DriftReport>,
}

fn ml_bin(score: f64) -> usize {
    ((score * ML_HISTOGRAM_BINS as f64) as usize).min(ML_HISTOGRAM_BINS - 1)
}

pub fn summarize_month(period: Period, rows: &[ScoredTransaction]) -> MonthlyReport {
    let n = rows.len() as u64;
    let decisions = DecisionShares::tally(rows.iter().map(|r| &r.decision));
    let customers: BTreeSet<&str> = rows.iter().map(|r| r.customer_id.as_str()).collect();

    let scores: Vec<f64> = rows.iter().filter_map(|r| r.ml_risk_score).collect();
    let (ml_mean, ml_variance) = if scores.is_empty() {
        (None, None)
    } else {
        let k = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / k;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / k;
        (Some(mean), Some(var))
    };

    let mut ml_histogram = vec![0u64; ML_HISTOGRAM_BINS];
    for s in &scores {
        ml_histogram[ml_bin(*s)] += 1;
    }

    let mut corridor_counts: BTreeMap<CountryCode, u64> = BTreeMap::new();
    for r in rows {
        *corridor_counts.entry(r.destination_country.clone()).or_default() += 1;
    }
    let corridor_shares = corridor_counts
        .into_iter()
        .map(|(k, c)| (k, c as f64 / n as f64))
        .collect();

    MonthlyReport {
        period,
        transactions: n,
        customers: customers.len() as u64,
        total_amount: rows.iter().map(|r| r.transaction_amount).sum(),
        decisions,
        ml_mean,
        ml_variance,
        ml_missing: n - scores.len() as u64,
        ml_histogram,
        trust_mean: (n > 0).then(|| rows.iter().map(|r| r.trust_score).sum::<f64>() / n as f64),
        corridor_shares,
    }
}

/// Population stability index between two share distributions.
/// Keys missing on one side count as a tiny epsilon share.
pub fn population_stability_index<K: Ord>(
    expected: &BTreeMap<K, f64>,
    actual: &BTreeMap<K, f64>,
) -> f64 {
    let keys: BTreeSet<&K> = expected.keys().chain(actual.keys()).collect();
    keys.into_iter()
        .map(|k| {
            let e = expected.get(k).copied().unwrap_or(0.0).max(PSI_EPSILON);
            let a = actual.get(k).copied().unwrap_or(0.0).max(PSI_EPSILON);
            (a - e) * (a / e).ln()
        })
        .sum()
}

fn histogram_shares(hist: &[u64]) -> BTreeMap<usize, f64> {
    let total: u64 = hist.iter().sum();
    hist.iter()
        .enumerate()
        .map(|(i, c)| {
            let share = if total == 0 { 0.0 } else { *c as f64 / total as f64 };
            (i, share)
        })
        .collect()
}

pub fn drift(from: &MonthlyReport, to: &MonthlyReport) -> DriftReport {
    let decision_share_delta = Decision::ALL
        .into_iter()
        .map(|d| (d, to.decisions.share(d) - from.decisions.share(d)))
        .collect();
    let corridor_psi = population_stability_index(&from.corridor_shares, &to.corridor_shares);
    let ml_score_psi = population_stability_index(
        &histogram_shares(&from.ml_histogram),
        &histogram_shares(&to.ml_histogram),
    );
    DriftReport {
        from: from.period,
        to: to.period,
        decision_share_delta,
        ml_mean_delta: from.ml_mean.zip(to.ml_mean).map(|(a, b)| b - a),
        corridor_psi,
        ml_score_psi,
        level: DriftLevel::from_psi(corridor_psi.max(ml_score_psi)),
    }
}

/// Summaries for each month, plus drift between consecutive months.
pub fn build_report<'a>(
    months: impl IntoIterator<Item = (Period, &'a [ScoredTransaction])>,
) -> MonitoringReport {
    let mut summaries: Vec<MonthlyReport> = months
        .into_iter()
        .map(|(p, rows)| summarize_month(p, rows))
        .collect();
    summaries.sort_by_key(|m| m.period);
    let drift = summaries.windows(2).map(|w| drift(&w[0], &w[1])).collect();
    MonitoringReport {
        months: summaries,
        drift,
    }
}
