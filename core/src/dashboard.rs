//! Dashboard views: read-only projections of the monthly decision
//! tables. Nothing here writes back.
//!
//! Views:
//!   overview      headline counts and the monthly decision split
//!   simulator     threshold tuning without retraining
//!   risk          ML score histogram and riskiest corridors
//!   explorer      filtered, risk-sorted transaction listing

use crate::{
    clock::Period,
    decision::{decide, Decision, DecisionPolicy},
    error::{DeskError, DeskResult},
    monitoring::DecisionShares,
    record::{RecordRejection, ScoredTransaction},
    signals::RuleFlag,
    table::{self, SCORED_PREFIX},
    types::CountryCode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const RISK_HISTOGRAM_BINS: usize = 20;
pub const TOP_CORRIDORS: usize = 5;
pub const EXPLORER_ROW_LIMIT: usize = 500;

/// All monthly scored tables, loaded once.
#[derive(Debug, Clone, Default)]
pub struct DashboardData {
    pub months: Vec<(Period, Vec<ScoredTransaction>)>,
    pub rejections: Vec<RecordRejection>,
}

impl DashboardData {
    pub fn new(mut months: Vec<(Period, Vec<ScoredTransaction>)>) -> Self {
        months.sort_by_key(|(p, _)| *p);
        Self {
            months,
            rejections: Vec::new(),
        }
    }

    /// Load every `risk_scored_transactions_YYYY_MM.csv` under `dir`.
    pub fn load(dir: &Path) -> DeskResult<Self> {
        let mut data = Self::default();
        for period in table::list_periods(dir, SCORED_PREFIX)? {
            let read = table::read_scored(dir, period)?;
            data.rejections.extend(read.rejections);
            data.months.push((period, read.records));
        }
        Ok(data)
    }

    pub fn rows(&self) -> impl Iterator<Item = (Period, &ScoredTransaction)> {
        self.months
            .iter()
            .flat_map(|(p, rows)| rows.iter().map(move |r| (*p, r)))
    }

    pub fn periods(&self) -> Vec<Period> {
        self.months.iter().map(|(p, _)| *p).collect()
    }
}

// ── Overview ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthDecisionSplit {
    pub period: Period,
    pub allow_pct: f64,
    pub review_pct: f64,
    pub block_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub total_transactions: usize,
    pub unique_customers: usize,
    pub months_covered: usize,
    pub destination_countries: usize,
    pub decision_split: Vec<MonthDecisionSplit>,
}

pub fn overview(data: &DashboardData) -> Overview {
    let customers: BTreeSet<&str> = data.rows().map(|(_, r)| r.customer_id.as_str()).collect();
    let destinations: BTreeSet<&str> = data
        .rows()
        .map(|(_, r)| r.destination_country.as_str())
        .collect();
    let decision_split = data
        .months
        .iter()
        .map(|(period, rows)| {
            let shares = DecisionShares::tally(rows.iter().map(|r| &r.decision));
            MonthDecisionSplit {
                period: *period,
                allow_pct: shares.percent(Decision::Allow),
                review_pct: shares.percent(Decision::Review),
                block_pct: shares.percent(Decision::Block),
            }
        })
        .collect();

    Overview {
        total_transactions: data.rows().count(),
        unique_customers: customers.len(),
        months_covered: data.months.len(),
        destination_countries: destinations.len(),
        decision_split,
    }
}

// ── Decision simulator ───────────────────────────────────────────

/// Threshold-only tuning; the model is not retrained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulatorSettings {
    /// BLOCK when ML score ≥ this.
    pub block_threshold: f64,
    /// REVIEW when ML score ≥ this.
    pub review_threshold: f64,
    /// ALLOW when trust ≥ this and the score is below block.
    pub trust_auto_allow: f64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            block_threshold: 0.9,
            review_threshold: 0.6,
            trust_auto_allow: 0.7,
        }
    }
}

impl SimulatorSettings {
    pub fn validate(&self) -> DeskResult<()> {
        for (field, value) in [
            ("block_threshold", self.block_threshold),
            ("review_threshold", self.review_threshold),
            ("trust_auto_allow", self.trust_auto_allow),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DeskError::OutOfRange { field, value });
            }
        }
        Ok(())
    }

    pub fn simulate(&self, row: &ScoredTransaction) -> Decision {
        let ml = row.ml_score_or_max();
        let decision = if ml >= self.block_threshold {
            Decision::Block
        } else if ml >= self.review_threshold {
            Decision::Review
        } else {
            Decision::Allow
        };
        if row.trust_score >= self.trust_auto_allow && ml < self.block_threshold {
            Decision::Allow
        } else {
            decision
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub recorded: DecisionShares,
    pub simulated: DecisionShares,
    /// Simulated minus recorded, in percentage points.
    pub delta_pct: BTreeMap<Decision, f64>,
}

fn simulation_result(recorded: DecisionShares, simulated: DecisionShares) -> SimulationResult {
    let delta_pct = Decision::ALL
        .into_iter()
        .map(|d| (d, simulated.percent(d) - recorded.percent(d)))
        .collect();
    SimulationResult {
        recorded,
        simulated,
        delta_pct,
    }
}

pub fn simulate_thresholds(data: &DashboardData, settings: &SimulatorSettings) -> DeskResult<SimulationResult> {
    settings.validate()?;
    let recorded = DecisionShares::tally(data.rows().map(|(_, r)| &r.decision));
    let simulated_decisions: Vec<Decision> = data.rows().map(|(_, r)| settings.simulate(r)).collect();
    Ok(simulation_result(recorded, DecisionShares::tally(&simulated_decisions)))
}

/// Re-decide every row under a full policy, using the recorded flags,
/// ML score and trust snapshot.
pub fn simulate_policy(data: &DashboardData, policy: &DecisionPolicy) -> DeskResult<SimulationResult> {
    policy.validate()?;
    let recorded = DecisionShares::tally(data.rows().map(|(_, r)| &r.decision));
    let mut simulated = Vec::with_capacity(recorded.total() as usize);
    for (_, row) in data.rows() {
        let flags: BTreeSet<RuleFlag> = row.reason_codes().filter_map(RuleFlag::from_code).collect();
        simulated.push(decide(policy, &flags, row.ml_risk_score, row.trust_score)?.decision);
    }
    Ok(simulation_result(recorded, DecisionShares::tally(&simulated)))
}

// ── Risk analysis ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

impl HistogramBin {
    pub fn label(&self) -> String {
        format!("{:.2}–{:.2}", self.lower, self.upper)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorridorRisk {
    pub destination: CountryCode,
    pub mean_ml_score: f64,
    pub transactions: u64,
}

/// Distribution of recorded ML scores. Rows without a score are left
/// out of both the histogram and the corridor means; the simulators
/// and the explorer read a missing score as 1.0 instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysis {
    pub histogram: Vec<HistogramBin>,
    pub top_corridors: Vec<CorridorRisk>,
}

pub fn risk_analysis(data: &DashboardData) -> RiskAnalysis {
    let width = 1.0 / RISK_HISTOGRAM_BINS as f64;
    let mut histogram: Vec<HistogramBin> = (0..RISK_HISTOGRAM_BINS)
        .map(|i| HistogramBin {
            lower: i as f64 * width,
            upper: (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    let mut by_corridor: BTreeMap<&str, (f64, u64)> = BTreeMap::new();
    for (_, row) in data.rows() {
        let Some(score) = row.ml_risk_score else { continue };
        // Right edge is closed on the last bin.
        let idx = ((score / width) as usize).min(RISK_HISTOGRAM_BINS - 1);
        histogram[idx].count += 1;
        let entry = by_corridor.entry(row.destination_country.as_str()).or_default();
        entry.0 += score;
        entry.1 += 1;
    }

    let mut top_corridors: Vec<CorridorRisk> = by_corridor
        .into_iter()
        .map(|(dest, (sum, n))| CorridorRisk {
            destination: dest.to_string(),
            mean_ml_score: sum / n as f64,
            transactions: n,
        })
        .collect();
    top_corridors.sort_by(|a, b| {
        b.mean_ml_score
            .total_cmp(&a.mean_ml_score)
            .then_with(|| a.destination.cmp(&b.destination))
    });
    top_corridors.truncate(TOP_CORRIDORS);

    RiskAnalysis {
        histogram,
        top_corridors,
    }
}

// ── Transaction explorer ─────────────────────────────────────────

/// Empty `periods` / `decisions` mean "all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplorerFilter {
    #[serde(default)]
    pub periods: Vec<Period>,
    #[serde(default)]
    pub decisions: Vec<Decision>,
    #[serde(default)]
    pub min_ml_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorerRow {
    pub transaction_id: String,
    pub period: Period,
    pub transaction_amount: f64,
    pub ml_risk_score: Option<f64>,
    pub trust_score: f64,
    pub decision: Decision,
    pub reason_codes_str: String,
}

/// Matching rows, riskiest first, capped at EXPLORER_ROW_LIMIT.
pub fn explore(data: &DashboardData, filter: &ExplorerFilter) -> Vec<ExplorerRow> {
    let mut rows: Vec<(Period, &ScoredTransaction)> = data
        .rows()
        .filter(|(p, _)| filter.periods.is_empty() || filter.periods.contains(p))
        .filter(|(_, r)| filter.decisions.is_empty() || filter.decisions.contains(&r.decision))
        .filter(|(_, r)| r.ml_score_or_max() >= filter.min_ml_score)
        .collect();
    rows.sort_by(|(_, a), (_, b)| {
        b.ml_score_or_max()
            .total_cmp(&a.ml_score_or_max())
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });
    rows.into_iter()
        .take(EXPLORER_ROW_LIMIT)
        .map(|(period, r)| ExplorerRow {
            transaction_id: r.transaction_id.clone(),
            period,
            transaction_amount: r.transaction_amount,
            ml_risk_score: r.ml_risk_score,
            trust_score: r.trust_score,
            decision: r.decision,
            reason_codes_str: r.reason_codes_str.clone(),
        })
        .collect()
}
