//! Decision engine: combines rule flags, ML score and trust score
//! into exactly one of ALLOW / REVIEW / BLOCK.
//!
//! ORDER OF EVALUATION (fixed):
//!   1. Validate inputs. Out-of-range scores are rejected, never clamped.
//!   2. Any flag the policy marks `critical` forces BLOCK.
//!   3. combined = (w_ml·m + w_trust·(1 − t)) / (w_ml + w_trust),
//!      with a missing ML score read as 1.0.
//!   4. Threshold combined against review/block.
//!   5. Any `escalate` flag lifts an ALLOW to REVIEW.
//!
//! The decision is a pure function of (flags, m, t, policy).

use crate::{
    error::{DeskError, DeskResult},
    signals::RuleFlag,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub const REASON_ML_SCORE_MISSING: &str = "ML_SCORE_MISSING";
pub const REASON_COMBINED_RISK_REVIEW: &str = "COMBINED_RISK_REVIEW";
pub const REASON_COMBINED_RISK_BLOCK: &str = "COMBINED_RISK_BLOCK";

/// Final outcome for a transaction. Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Review,
    Block,
}

impl Decision {
    pub const ALL: [Decision; 3] = [Decision::Allow, Decision::Review, Decision::Block];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "ALLOW",
            Self::Review => "REVIEW",
            Self::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = DeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Self::Allow),
            "REVIEW" => Ok(Self::Review),
            "BLOCK" => Ok(Self::Block),
            other => Err(DeskError::validation("decision", format!("unknown decision '{other}'"))),
        }
    }
}

/// How the policy treats a raised rule flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    /// Reported as a reason code only.
    #[default]
    Info,
    /// Decision is at least REVIEW.
    Escalate,
    /// Decision is BLOCK regardless of scores.
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionPolicy {
    pub review_threshold: f64,
    pub block_threshold: f64,
    pub ml_weight: f64,
    pub trust_weight: f64,
    /// Flags absent from the map are `info`.
    #[serde(default)]
    pub flag_severity: BTreeMap<RuleFlag, FlagSeverity>,
}

impl DecisionPolicy {
    pub fn validate(&self) -> DeskResult<()> {
        let fields = [
            ("review_threshold", self.review_threshold),
            ("block_threshold", self.block_threshold),
            ("ml_weight", self.ml_weight),
            ("trust_weight", self.trust_weight),
        ];
        if let Some((name, v)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(DeskError::InvalidPolicy(format!("{name} is not finite: {v}")));
        }
        if !(0.0 <= self.review_threshold
            && self.review_threshold < self.block_threshold
            && self.block_threshold <= 1.0)
        {
            return Err(DeskError::InvalidPolicy(format!(
                "thresholds must satisfy 0 <= review < block <= 1, got review={} block={}",
                self.review_threshold, self.block_threshold
            )));
        }
        if self.ml_weight < 0.0 || self.trust_weight < 0.0 {
            return Err(DeskError::InvalidPolicy("weights must be non-negative".into()));
        }
        if self.ml_weight + self.trust_weight <= 0.0 {
            return Err(DeskError::InvalidPolicy("weights must not both be zero".into()));
        }
        Ok(())
    }

    pub fn severity_of(&self, flag: RuleFlag) -> FlagSeverity {
        self.flag_severity.get(&flag).copied().unwrap_or_default()
    }

    /// Weighted blend of ML score and inverse trust, normalized by
    /// the weight sum so the result stays in [0, 1].
    pub fn combined_risk(&self, ml_score: f64, trust_score: f64) -> f64 {
        let total = self.ml_weight + self.trust_weight;
        (self.ml_weight * ml_score + self.trust_weight * (1.0 - trust_score)) / total
    }

    pub fn threshold(&self, combined: f64) -> Decision {
        if combined >= self.block_threshold {
            Decision::Block
        } else if combined >= self.review_threshold {
            Decision::Review
        } else {
            Decision::Allow
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decision: Decision,
    /// None when a critical flag short-circuited the blend.
    pub combined_risk: Option<f64>,
    pub reason_codes: Vec<String>,
}

fn check_unit(field: &'static str, value: f64) -> DeskResult<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DeskError::OutOfRange { field, value })
    }
}

/// Decide one transaction. Fails only on invalid inputs.
pub fn decide(
    policy: &DecisionPolicy,
    flags: &BTreeSet<RuleFlag>,
    ml_score: Option<f64>,
    trust_score: f64,
) -> DeskResult<DecisionOutcome> {
    check_unit("trust_score", trust_score)?;
    if let Some(m) = ml_score {
        check_unit("ml_score", m)?;
    }

    let mut reason_codes: Vec<String> = flags.iter().map(|f| f.code().to_string()).collect();
    if ml_score.is_none() {
        reason_codes.push(REASON_ML_SCORE_MISSING.into());
    }

    if flags.iter().any(|f| policy.severity_of(*f) == FlagSeverity::Critical) {
        return Ok(DecisionOutcome {
            decision: Decision::Block,
            combined_risk: None,
            reason_codes,
        });
    }

    let combined = policy.combined_risk(ml_score.unwrap_or(1.0), trust_score);
    let mut decision = policy.threshold(combined);
    match decision {
        Decision::Block => reason_codes.push(REASON_COMBINED_RISK_BLOCK.into()),
        Decision::Review => reason_codes.push(REASON_COMBINED_RISK_REVIEW.into()),
        Decision::Allow => {}
    }

    if decision == Decision::Allow
        && flags.iter().any(|f| policy.severity_of(*f) == FlagSeverity::Escalate)
    {
        decision = Decision::Review;
    }

    Ok(DecisionOutcome {
        decision,
        combined_risk: Some(combined),
        reason_codes,
    })
}

/// A validated policy bound for repeated use over a batch.
pub struct DecisionEngine {
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy) -> DeskResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn decide(
        &self,
        flags: &BTreeSet<RuleFlag>,
        ml_score: Option<f64>,
        trust_score: f64,
    ) -> DeskResult<DecisionOutcome> {
        decide(&self.policy, flags, ml_score, trust_score)
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }
}
