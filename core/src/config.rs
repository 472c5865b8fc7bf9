use crate::{
    clock::Period,
    decision::{DecisionPolicy, FlagSeverity},
    signals::RuleFlag,
    types::CountryCode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One destination corridor out of the source country.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorridorConfig {
    pub destination: CountryCode,
    pub label: String,
    /// Share of normal customers' usual-corridor draws.
    pub volume_share: f64,
    /// Prior risk of the corridor in [0, 1]; an ML feature.
    pub base_risk: f64,
    #[serde(default)]
    pub high_risk: bool,
    #[serde(default)]
    pub sanctioned: bool,
    pub amount_pareto_xmin: f64,
    pub amount_pareto_alpha: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct CorridorsFile {
    corridors: Vec<CorridorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub source_country: CountryCode,
    pub customer_count: usize,
    /// Customers onboard up to this many days before the first period.
    pub onboarding_window_days: i64,
    pub monthly_txn_mean: f64,
    /// Individual mean = population mean × (1 ± spread/2).
    pub monthly_txn_spread: f64,
    pub usual_corridors_max: usize,
    /// Chance a normal customer's transaction leaves its usual corridors.
    pub exploration_rate: f64,
    pub device_change_rate: f64,
    pub risky_customer_share: f64,
    pub risky_exploration_rate: f64,
    pub risky_device_change_rate: f64,
    pub risky_amount_multiplier: f64,
    /// Chance a risky customer fires a same-hour burst in a month.
    pub risky_burst_probability: f64,
    pub burst_size: usize,
    pub amount_cap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    pub velocity_window_hours: i64,
    pub velocity_max_txns: usize,
    pub high_amount_threshold: f64,
    pub new_customer_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Weight of the month's quality in the moving average.
    pub smoothing: f64,
    /// Flat deduction per REVIEW outcome, applied after smoothing.
    pub review_penalty: f64,
    /// Flat deduction per BLOCK outcome, applied after smoothing.
    pub block_penalty: f64,
    /// Largest move a single month may make before the penalties.
    pub max_step: f64,
    pub initial_base: f64,
    pub initial_tenure_weight: f64,
    pub tenure_saturation_days: f64,
    pub initial_history_weight: f64,
    pub history_saturation: f64,
}

/// Coefficients of the logistic stand-in model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlModelConfig {
    pub model_version: String,
    pub intercept: f64,
    pub coef_log_amount: f64,
    pub coef_corridor_risk: f64,
    pub coef_device_change: f64,
    pub coef_new_corridor: f64,
    pub coef_velocity: f64,
    pub coef_tenure_years: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct RunFile {
    start_period: Period,
    months: u32,
}

#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub generator:    GeneratorConfig,
    pub corridors:    Vec<CorridorConfig>,
    pub signals:      SignalConfig,
    pub trust:        TrustConfig,
    pub ml_model:     MlModelConfig,
    pub policy:       DecisionPolicy,
    pub start_period: Period,
    pub months:       u32,
}

fn read_json<T: serde::de::DeserializeOwned>(data_dir: &str, file: &str) -> anyhow::Result<T> {
    let path = format!("{data_dir}/{file}");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
    serde_json::from_str(&content).map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))
}

impl DeskConfig {
    /// Load from the data/ directory.
    /// In tests, use DeskConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let run: RunFile = read_json(data_dir, "run.json")?;
        let corridors: CorridorsFile = read_json(data_dir, "corridors.json")?;
        let config = Self {
            generator: read_json(data_dir, "generator.json")?,
            corridors: corridors.corridors,
            signals: read_json(data_dir, "signals.json")?,
            trust: read_json(data_dir, "trust.json")?,
            ml_model: read_json(data_dir, "ml_model.json")?,
            policy: read_json(data_dir, "policy.json")?,
            start_period: run.start_period,
            months: run.months,
        };
        config.policy.validate()?;
        if config.corridors.is_empty() {
            anyhow::bail!("{data_dir}/corridors.json lists no corridors");
        }
        Ok(config)
    }

    pub fn corridor(&self, destination: &str) -> Option<&CorridorConfig> {
        self.corridors.iter().find(|c| c.destination == destination)
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let corridor = |dest: &str, label: &str, share: f64, risk: f64, xmin: f64| CorridorConfig {
            destination: dest.into(),
            label: label.into(),
            volume_share: share,
            base_risk: risk,
            high_risk: false,
            sanctioned: false,
            amount_pareto_xmin: xmin,
            amount_pareto_alpha: 1.8,
        };
        let mut corridors = vec![
            corridor("AE", "India → UAE", 0.30, 0.15, 200.0),
            corridor("US", "India → United States", 0.25, 0.10, 300.0),
            corridor("GB", "India → United Kingdom", 0.20, 0.10, 250.0),
            corridor("SG", "India → Singapore", 0.15, 0.12, 250.0),
            corridor("NG", "India → Nigeria", 0.05, 0.55, 150.0),
            corridor("KP", "India → North Korea", 0.0, 0.95, 100.0),
        ];
        corridors[4].high_risk = true;
        corridors[5].sanctioned = true;

        let mut flag_severity = BTreeMap::new();
        flag_severity.insert(RuleFlag::SanctionedCorridor, FlagSeverity::Critical);
        flag_severity.insert(RuleFlag::HighRiskCorridor, FlagSeverity::Escalate);

        Self {
            generator: GeneratorConfig {
                source_country: "IN".into(),
                customer_count: 50,
                onboarding_window_days: 720,
                monthly_txn_mean: 4.0,
                monthly_txn_spread: 0.6,
                usual_corridors_max: 2,
                exploration_rate: 0.05,
                device_change_rate: 0.03,
                risky_customer_share: 0.10,
                risky_exploration_rate: 0.40,
                risky_device_change_rate: 0.30,
                risky_amount_multiplier: 2.5,
                risky_burst_probability: 0.5,
                burst_size: 4,
                amount_cap: 20_000.0,
            },
            corridors,
            signals: SignalConfig {
                velocity_window_hours: 24,
                velocity_max_txns: 3,
                high_amount_threshold: 5_000.0,
                new_customer_days: 30,
            },
            trust: TrustConfig {
                smoothing: 0.3,
                review_penalty: 0.02,
                block_penalty: 0.05,
                max_step: 0.15,
                initial_base: 0.4,
                initial_tenure_weight: 0.3,
                tenure_saturation_days: 730.0,
                initial_history_weight: 0.2,
                history_saturation: 100.0,
            },
            ml_model: MlModelConfig {
                model_version: "logistic-heuristic-v1".into(),
                intercept: -5.0,
                coef_log_amount: 0.35,
                coef_corridor_risk: 3.0,
                coef_device_change: 1.4,
                coef_new_corridor: 1.1,
                coef_velocity: 0.35,
                coef_tenure_years: -0.4,
            },
            policy: DecisionPolicy {
                review_threshold: 0.3,
                block_threshold: 0.6,
                ml_weight: 0.7,
                trust_weight: 0.3,
                flag_severity,
            },
            start_period: Period::new(2025, 1).expect("valid period"),
            months: 3,
        }
    }
}
