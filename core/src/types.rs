//! Shared primitive types used across the entire pipeline.

/// A stable, unique identifier for any entity (customer, transaction).
pub type EntityId = String;

/// The canonical run identifier.
pub type RunId = String;

/// ISO 3166-1 alpha-2 country code, e.g. "IN", "AE".
pub type CountryCode = String;
