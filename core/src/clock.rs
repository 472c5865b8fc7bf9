//! Period clock: owns the monitoring-period sequence of a run.
//!
//! One period is one calendar month. Trust scores are recalculated
//! only when a period closes, never mid-month.

use crate::{
    error::{DeskError, DeskResult},
    types::RunId,
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month, labelled `YYYY_MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> DeskResult<Self> {
        if !(1900..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(DeskError::InvalidPeriod(format!("{year:04}_{month:02}")));
        }
        Ok(Self { year, month })
    }

    /// The period containing `ts`.
    pub fn of(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Months since year 0; stable key for RNG streams and ordering.
    pub fn ordinal(&self) -> u32 {
        self.year as u32 * 12 + (self.month - 1)
    }

    pub fn label(&self) -> String {
        format!("{:04}_{:02}", self.year, self.month)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
            .expect("Period is validated on construction")
    }

    pub fn days_in_month(&self) -> u32 {
        let next = self.next().first_day();
        (next - self.first_day()).num_days() as u32
    }

    pub fn start(&self) -> NaiveDateTime {
        self.first_day().and_time(chrono::NaiveTime::MIN)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        Self::of(ts) == *self
    }

    /// `count` consecutive periods beginning at `self`.
    pub fn sequence(self, count: u32) -> Vec<Period> {
        let mut out = Vec::with_capacity(count as usize);
        let mut p = self;
        for _ in 0..count {
            out.push(p);
            p = p.next();
        }
        out
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}_{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = DeskError;

    /// Accepts `2025_01` and `2025-01`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DeskError::InvalidPeriod(s.to_string());
        let (y, m) = s.split_once(['_', '-']).ok_or_else(bad)?;
        if y.len() != 4 || m.len() != 2 {
            return Err(bad());
        }
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        Period::new(year, month).map_err(|_| bad())
    }
}

impl TryFrom<String> for Period {
    type Error = DeskError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Period> for String {
    fn from(p: Period) -> Self {
        p.label()
    }
}

/// Tracks which period is open and which was closed last.
/// Periods must be opened in strictly increasing order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodClock {
    pub run_id:         RunId,
    pub open:           Option<Period>,
    pub last_closed:    Option<Period>,
    pub periods_closed: u32,
}

impl PeriodClock {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            open: None,
            last_closed: None,
            periods_closed: 0,
        }
    }

    /// Open `period` for scoring.
    pub fn open(&mut self, period: Period) -> DeskResult<()> {
        let latest = self.open.or(self.last_closed);
        if let Some(last) = latest {
            if period <= last {
                return Err(DeskError::PeriodOutOfOrder {
                    period: period.label(),
                    last: last.label(),
                });
            }
        }
        self.open = Some(period);
        Ok(())
    }

    /// Drop the open period without closing it, so it can be retried.
    pub fn abort(&mut self) -> Option<Period> {
        self.open.take()
    }

    /// Close the open period. Returns it, or None if nothing was open.
    pub fn close(&mut self) -> Option<Period> {
        let period = self.open.take()?;
        self.last_closed = Some(period);
        self.periods_closed += 1;
        Some(period)
    }
}
