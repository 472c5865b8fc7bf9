use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Table error: {0}")]
    Table(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid record '{record}': {reason}")]
    Validation { record: String, reason: String },

    #[error("{field} out of range [0, 1]: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid period '{0}': expected YYYY_MM")]
    InvalidPeriod(String),

    #[error("Period {period} already scored (last closed: {last})")]
    PeriodOutOfOrder { period: String, last: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DeskResult<T> = Result<T, DeskError>;

impl DeskError {
    pub fn validation(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            record: record.into(),
            reason: reason.into(),
        }
    }
}
