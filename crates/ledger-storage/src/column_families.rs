//! Column family definitions for RocksDB.
//!
//! Each column family isolates data with different access patterns:
//! - usage_by_time: Rows ordered by bucket, scanned for range reports
//! - usage_by_key: The same rows ordered by key, for per-key lookups
//! - ledger_meta: Store-level settings fixed at creation (precision)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family for usage rows keyed by bucket then key
pub const CF_USAGE_BY_TIME: &str = "usage_by_time";

/// Column family for usage rows keyed by key then bucket
pub const CF_USAGE_BY_KEY: &str = "usage_by_key";

/// Column family for ledger metadata
pub const CF_LEDGER_META: &str = "ledger_meta";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_USAGE_BY_TIME, CF_USAGE_BY_KEY, CF_LEDGER_META];

/// Options for the usage indexes (append-only, highly repetitive keys)
fn usage_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_USAGE_BY_TIME, usage_options()),
        ColumnFamilyDescriptor::new(CF_USAGE_BY_KEY, usage_options()),
        ColumnFamilyDescriptor::new(CF_LEDGER_META, Options::default()),
    ]
}
