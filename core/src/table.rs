//! Delimited-table I/O for the input and monthly output tables.
//!
//! RULE: Only table.rs touches CSV files.
//! Readers never fail on a bad row: the row is rejected with its line
//! number and reading continues. Missing or unreadable files fail.

use crate::{
    clock::Period,
    error::DeskResult,
    record::{CustomerProfile, RecordRejection, ScoredTransaction, TransactionRecord},
};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CUSTOMERS_FILE: &str = "customers.csv";
pub const TRANSACTIONS_PREFIX: &str = "transactions_";
pub const SCORED_PREFIX: &str = "risk_scored_transactions_";

/// Rows that passed validation, plus the ones that did not.
#[derive(Debug, Clone)]
pub struct TableRead<T> {
    pub records: Vec<T>,
    pub rejections: Vec<RecordRejection>,
}

pub fn transactions_path(dir: &Path, period: Period) -> PathBuf {
    dir.join(format!("{TRANSACTIONS_PREFIX}{}.csv", period.label()))
}

pub fn scored_path(dir: &Path, period: Period) -> PathBuf {
    dir.join(format!("{SCORED_PREFIX}{}.csv", period.label()))
}

fn read_table<T, F, K>(path: &Path, validate: F, key: K) -> DeskResult<TableRead<T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> DeskResult<()>,
    K: Fn(&T) -> String,
{
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut out = TableRead {
        records: Vec::new(),
        rejections: Vec::new(),
    };

    for result in reader.deserialize::<T>() {
        match result {
            Ok(record) => {
                if let Err(e) = validate(&record) {
                    let rejection = RecordRejection::from_error(key(&record), None, &e);
                    log::warn!("{}: rejected {}: {}", path.display(), rejection.record, rejection.reason);
                    out.rejections.push(rejection);
                } else {
                    out.records.push(record);
                }
            }
            Err(e) => {
                let line = e.position().map(|p| p.line());
                let record = line.map(|l| format!("line {l}")).unwrap_or_else(|| "unknown".into());
                log::warn!("{}: rejected {record}: {e}", path.display());
                out.rejections.push(RecordRejection {
                    record,
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(out)
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> DeskResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_customers(dir: &Path) -> DeskResult<TableRead<CustomerProfile>> {
    read_table(&dir.join(CUSTOMERS_FILE), CustomerProfile::validate, |c| {
        c.customer_id.clone()
    })
}

pub fn write_customers(dir: &Path, customers: &[CustomerProfile]) -> DeskResult<PathBuf> {
    let path = dir.join(CUSTOMERS_FILE);
    write_table(&path, customers)?;
    Ok(path)
}

pub fn read_transactions(dir: &Path, period: Period) -> DeskResult<TableRead<TransactionRecord>> {
    read_table(&transactions_path(dir, period), TransactionRecord::validate, |t| {
        t.transaction_id.clone()
    })
}

pub fn write_transactions(
    dir: &Path,
    period: Period,
    txns: &[TransactionRecord],
) -> DeskResult<PathBuf> {
    let path = transactions_path(dir, period);
    write_table(&path, txns)?;
    Ok(path)
}

pub fn read_scored(dir: &Path, period: Period) -> DeskResult<TableRead<ScoredTransaction>> {
    read_table(&scored_path(dir, period), ScoredTransaction::validate, |t| {
        t.transaction_id.clone()
    })
}

pub fn write_scored(
    dir: &Path,
    period: Period,
    rows: &[ScoredTransaction],
) -> DeskResult<PathBuf> {
    let path = scored_path(dir, period);
    write_table(&path, rows)?;
    Ok(path)
}

/// Periods for which `dir` holds a `<prefix>YYYY_MM.csv`, ascending.
pub fn list_periods(dir: &Path, prefix: &str) -> DeskResult<Vec<Period>> {
    let mut periods = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(label) = name
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(".csv"))
        else {
            continue;
        };
        if let Ok(period) = label.parse::<Period>() {
            periods.push(period);
        }
    }
    periods.sort();
    periods.dedup();
    Ok(periods)
}
