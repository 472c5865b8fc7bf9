//! Synthetic data generator: customers and outbound transactions.
//!
//! Deterministic: every draw comes from the run's RngBank. The
//! customer population uses one run-wide stream; each month's
//! transactions use their own stream, so regenerating one month never
//! shifts another.

use crate::{
    clock::Period,
    config::{CorridorConfig, DeskConfig},
    record::{CustomerProfile, TransactionRecord},
    rng::{RngBank, StageRng, StageSlot},
    trust::initial_trust,
    types::CountryCode,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use uuid::Builder;

/// A generated customer: the public profile plus the latent
/// behaviour that shapes its transactions. Latent fields never reach
/// the output tables.
#[derive(Debug, Clone)]
pub struct SyntheticCustomer {
    pub profile: CustomerProfile,
    pub usual_corridors: Vec<CountryCode>,
    pub monthly_txn_mean: f64,
    pub exploration_rate: f64,
    pub device_change_rate: f64,
    pub amount_multiplier: f64,
    pub risky: bool,
}

/// Customers plus one transaction table per month.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    pub customers: Vec<SyntheticCustomer>,
    pub months: Vec<(Period, Vec<TransactionRecord>)>,
}

impl SyntheticDataset {
    pub fn profiles(&self) -> Vec<CustomerProfile> {
        self.customers.iter().map(|c| c.profile.clone()).collect()
    }

    pub fn transaction_count(&self) -> usize {
        self.months.iter().map(|(_, t)| t.len()).sum()
    }
}

pub struct SyntheticGenerator<'a> {
    config: &'a DeskConfig,
}

impl<'a> SyntheticGenerator<'a> {
    pub fn new(config: &'a DeskConfig) -> Self {
        Self { config }
    }

    /// Build the population as it stands on `as_of`.
    pub fn generate_customers(&self, as_of: NaiveDate, rng: &mut StageRng) -> Vec<SyntheticCustomer> {
        let g = &self.config.generator;
        let mut customers = Vec::with_capacity(g.customer_count);

        for i in 0..g.customer_count {
            let risky = rng.chance(g.risky_customer_share);
            let tenure_days = rng.next_u64_below(g.onboarding_window_days.max(1) as u64) as i64;
            let onboarding_date = as_of - Duration::days(tenure_days);

            // Individual mean: population mean ± spread/2
            let mean_adj = 1.0 + (rng.next_f64() - 0.5) * g.monthly_txn_spread;
            let monthly_txn_mean = (g.monthly_txn_mean * mean_adj).max(0.5);

            let tenure_months = tenure_days as f64 / 30.0;
            let historical_txn_count =
                (tenure_months * monthly_txn_mean * rng.uniform(0.6, 1.2)).round() as u64;

            let usual_corridors = self.pick_usual_corridors(rng);

            let profile = CustomerProfile {
                customer_id: format!("c-{i:06}"),
                onboarding_date,
                historical_txn_count,
                trust_score: initial_trust(&self.config.trust, tenure_days, historical_txn_count),
            };

            customers.push(SyntheticCustomer {
                profile,
                usual_corridors,
                monthly_txn_mean,
                exploration_rate: if risky { g.risky_exploration_rate } else { g.exploration_rate },
                device_change_rate: if risky { g.risky_device_change_rate } else { g.device_change_rate },
                amount_multiplier: if risky { g.risky_amount_multiplier } else { 1.0 },
                risky,
            });
        }

        let risky = customers.iter().filter(|c| c.risky).count();
        log::info!("generator: built {} customers ({risky} risky)", customers.len());
        customers
    }

    fn pick_usual_corridors(&self, rng: &mut StageRng) -> Vec<CountryCode> {
        let max = self.config.generator.usual_corridors_max.max(1) as u64;
        let wanted = 1 + rng.next_u64_below(max) as usize;
        let mut weights: Vec<f64> = self.config.corridors.iter().map(|c| c.volume_share).collect();
        let mut picked = Vec::with_capacity(wanted);
        while picked.len() < wanted {
            let Some(idx) = rng.pick_weighted(&weights) else { break };
            weights[idx] = 0.0;
            picked.push(self.config.corridors[idx].destination.clone());
        }
        picked
    }

    /// Pick a destination outside the customer's usual set. Risky
    /// customers are drawn toward risky corridors.
    fn pick_exploration(&self, customer: &SyntheticCustomer, rng: &mut StageRng) -> Option<&CorridorConfig> {
        let candidates: Vec<&CorridorConfig> = self
            .config
            .corridors
            .iter()
            .filter(|c| !customer.usual_corridors.contains(&c.destination))
            .collect();
        let weights: Vec<f64> = candidates
            .iter()
            .map(|c| if customer.risky { c.base_risk } else { c.volume_share })
            .collect();
        rng.pick_weighted(&weights).map(|i| candidates[i])
    }

    fn corridor(&self, destination: &str) -> Option<&CorridorConfig> {
        self.config.corridor(destination)
    }

    fn draw_amount(&self, corridor: &CorridorConfig, multiplier: f64, rng: &mut StageRng) -> f64 {
        let raw = rng.pareto(corridor.amount_pareto_xmin, corridor.amount_pareto_alpha) * multiplier;
        (raw.min(self.config.generator.amount_cap) * 100.0).round() / 100.0
    }

    fn make_txn(
        &self,
        customer: &SyntheticCustomer,
        corridor: &CorridorConfig,
        timestamp: NaiveDateTime,
        device_changed: bool,
        rng: &mut StageRng,
    ) -> TransactionRecord {
        TransactionRecord {
            transaction_id: Builder::from_random_bytes(rng.next_bytes16()).into_uuid().to_string(),
            customer_id: customer.profile.customer_id.clone(),
            transaction_timestamp: timestamp,
            source_country: self.config.generator.source_country.clone(),
            destination_country: corridor.destination.clone(),
            transaction_amount: self.draw_amount(corridor, customer.amount_multiplier, rng),
            device_changed,
            ml_risk_score: None,
        }
    }

    fn random_timestamp(&self, period: Period, rng: &mut StageRng) -> NaiveDateTime {
        let day = rng.next_u64_below(period.days_in_month() as u64) as i64;
        let second = rng.next_u64_below(86_400) as i64;
        period.start() + Duration::days(day) + Duration::seconds(second)
    }

    /// One month of transactions, sorted by (timestamp, id).
    pub fn generate_month(
        &self,
        customers: &[SyntheticCustomer],
        period: Period,
        rng: &mut StageRng,
    ) -> Vec<TransactionRecord> {
        let g = &self.config.generator;
        let mut txns = Vec::new();

        for customer in customers {
            // Customers onboarded after the month contribute nothing.
            if customer.profile.onboarding_date >= period.next().first_day() {
                continue;
            }

            // Poisson approximation: floor certain, remainder probabilistic.
            let expected = customer.monthly_txn_mean * rng.uniform(0.7, 1.3);
            let count = expected.floor() as u32 + u32::from(rng.chance(expected.fract()));

            for _ in 0..count {
                let corridor = if rng.chance(customer.exploration_rate) {
                    self.pick_exploration(customer, rng)
                } else {
                    None
                }
                .or_else(|| {
                    let idx = rng.next_u64_below(customer.usual_corridors.len().max(1) as u64) as usize;
                    customer.usual_corridors.get(idx).and_then(|d| self.corridor(d))
                });
                let Some(corridor) = corridor else { continue };

                let timestamp = self.random_timestamp(period, rng);
                let device_changed = rng.chance(customer.device_change_rate);
                txns.push(self.make_txn(customer, corridor, timestamp, device_changed, rng));
            }

            // Risky customers occasionally fire a same-hour burst to a
            // fresh corridor from a new device.
            if customer.risky && rng.chance(g.risky_burst_probability) {
                if let Some(corridor) = self.pick_exploration(customer, rng) {
                    let start = self.random_timestamp(period, rng);
                    for k in 0..g.burst_size {
                        let ts = start + Duration::minutes(7 * k as i64);
                        if !period.contains(ts) {
                            break;
                        }
                        txns.push(self.make_txn(customer, corridor, ts, k == 0, rng));
                    }
                }
            }
        }

        txns.sort_by(|a, b| {
            a.transaction_timestamp
                .cmp(&b.transaction_timestamp)
                .then_with(|| a.transaction_id.cmp(&b.transaction_id))
        });
        txns
    }
}

/// Generate the full dataset for `months` periods starting at `start`.
pub fn generate_dataset(config: &DeskConfig, seed: u64, start: Period, months: u32) -> SyntheticDataset {
    let bank = RngBank::new(seed);
    let generator = SyntheticGenerator::new(config);
    let customers = generator.generate_customers(start.first_day(), &mut bank.for_stage(StageSlot::Customer));

    let months = start
        .sequence(months)
        .into_iter()
        .map(|period| {
            let mut rng = bank.for_stage_period(StageSlot::Transaction, period);
            let txns = generator.generate_month(&customers, period, &mut rng);
            log::info!("{}: {period} produced {} transactions", rng.name, txns.len());
            (period, txns)
        })
        .collect();

    SyntheticDataset { customers, months }
}
