//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB could not be opened
    #[error("Failed to open usage store at {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: rocksdb::Error,
    },

    /// Column family or ledger metadata is missing or unreadable
    #[error("Schema error: {0}")]
    Schema(String),

    /// A usage batch could not be checked or committed
    #[error("Transaction error: {context}: {source}")]
    Transaction {
        context: String,
        #[source]
        source: rocksdb::Error,
    },

    /// A range scan or point read failed
    #[error("Query error: {context}: {source}")]
    Query {
        context: String,
        #[source]
        source: rocksdb::Error,
    },

    /// A stored key could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Caller supplied a value the store cannot represent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The ledger has been closed
    #[error("Usage ledger is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn transaction(context: impl Into<String>, source: rocksdb::Error) -> Self {
        StorageError::Transaction {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn query(context: impl Into<String>, source: rocksdb::Error) -> Self {
        StorageError::Query {
            context: context.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Writes are insert-if-absent and reads are side-effect free, so both
    /// can be replayed safely.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Transaction { .. } | StorageError::Query { .. }
        )
    }
}
