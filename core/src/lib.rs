//! Cross-border risk desk: synthetic outbound transactions from India,
//! rule + ML + trust decisioning, and month-over-month drift reporting.
//!
//! Module map, leaves first:
//!   types, error, rng, clock, config
//!   record, table              (tabular I/O with per-record validation)
//!   generator                  (synthetic customers and transactions)
//!   signals, ml, trust         (inputs to the decision)
//!   decision                   (policy-driven ALLOW / REVIEW / BLOCK)
//!   monitoring, dashboard      (read-only aggregation)
//!   event, store, engine       (batch orchestration and run ledger)

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod decision;
pub mod engine;
pub mod error;
pub mod event;
pub mod generator;
pub mod ml;
pub mod monitoring;
pub mod record;
pub mod rng;
pub mod signals;
pub mod store;
pub mod table;
pub mod trust;
pub mod types;
