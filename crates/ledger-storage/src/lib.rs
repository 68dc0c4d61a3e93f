//! Storage layer for the usage ledger.
//!
//! Provides a RocksDB-backed ledger with:
//! - Epoch-anchored bucket quantization of usage events
//! - Idempotent, atomic batches via insert-if-absent + WriteBatch
//! - Time-prefixed keys for efficient range aggregation
//! - A key-prefixed index for per-key lookups
//! - A single serialized writer path shared across threads

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;

pub use db::{LedgerStats, UsageLedger};
pub use error::StorageError;
pub use keys::{KeyIndexKey, TimeKey};
