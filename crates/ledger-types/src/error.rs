//! Error types for the usage ledger domain.

use thiserror::Error;

/// Errors raised while building ledger configuration and domain values.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bucket width is zero or not a whole number of seconds
    #[error("Invalid precision: {0}")]
    InvalidPrecision(String),
}
