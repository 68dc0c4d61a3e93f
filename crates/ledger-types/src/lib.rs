//! # ledger-types
//!
//! Shared domain types for the usage ledger.
//!
//! This crate defines:
//! - Precision: bucket width and the epoch-anchored quantization rule
//! - UsageRecord / UsageReport: stored rows and aggregated query results
//! - Clock: injectable time source used for bucket assignment
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use ledger_types::Precision;
//!
//! let precision = Precision::from_mins(5).unwrap();
//! assert_eq!(precision.bucket_start(1_706_540_523), 1_706_540_400);
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod usage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use error::LedgerError;
pub use usage::{Precision, UsageRecord, UsageReport};
