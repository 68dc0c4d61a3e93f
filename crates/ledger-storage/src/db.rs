//! RocksDB-backed usage ledger.
//!
//! Provides:
//! - Database open/close with column family setup
//! - Idempotent, atomic usage batches (insert-if-absent per row)
//! - Range aggregation over the time index
//! - Per-key lookups over the key index

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ledger_types::{Clock, Precision, SystemClock, UsageReport};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, error, info, warn};

use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_LEDGER_META, CF_USAGE_BY_KEY, CF_USAGE_BY_TIME,
};
use crate::error::StorageError;
use crate::keys::{check_bucket, KeyIndexKey, TimeKey, META_PRECISION};

fn cf_handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, StorageError> {
    db.cf_handle(name)
        .ok_or_else(|| StorageError::Schema(format!("Column family not found: {}", name)))
}

/// Durable record of which keys were active in which buckets.
///
/// Shared across request handlers as `Arc<UsageLedger>`. Writes are
/// serialized through one internal writer lock; reads run concurrently with
/// each other and with writes.
pub struct UsageLedger {
    /// `None` once the ledger has been closed
    db: RwLock<Option<DB>>,
    /// Serializes every mutating operation
    writer: Mutex<()>,
    precision: Precision,
    clock: Arc<dyn Clock>,
    path: PathBuf,
}

impl UsageLedger {
    /// Open the ledger at `path` using the system clock, creating it if
    /// necessary.
    pub fn open(path: &Path, precision: Precision) -> Result<Self, StorageError> {
        Self::open_with_clock(path, precision, Arc::new(SystemClock))
    }

    /// Open the ledger with an explicit time source.
    pub fn open_with_clock(
        path: &Path,
        precision: Precision,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        info!(path = ?path, %precision, "Opening usage ledger");

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        // Append-only workload
        db_opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
        db_opts.set_max_background_jobs(2);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors()).map_err(
            |source| StorageError::Connection {
                path: path.display().to_string(),
                source,
            },
        )?;

        for name in ALL_CF_NAMES {
            cf_handle(&db, name)?;
        }
        Self::check_precision(&db, precision)?;

        Ok(Self {
            db: RwLock::new(Some(db)),
            writer: Mutex::new(()),
            precision,
            clock,
            path: path.to_path_buf(),
        })
    }

    /// Remember the precision on first open; warn when it later differs.
    ///
    /// Rows carry only their bucket start, so a new precision silently
    /// re-weights everything already stored.
    fn check_precision(db: &DB, precision: Precision) -> Result<(), StorageError> {
        let cf = cf_handle(db, CF_LEDGER_META)?;
        let stored = db
            .get_cf(cf, META_PRECISION)
            .map_err(|e| StorageError::Schema(format!("Failed to read stored precision: {}", e)))?;

        match stored {
            Some(bytes) => {
                let stored_secs = <[u8; 8]>::try_from(bytes.as_slice())
                    .map(u64::from_be_bytes)
                    .map_err(|_| {
                        StorageError::Schema(format!(
                            "Corrupt precision record ({} bytes)",
                            bytes.len()
                        ))
                    })?;
                if stored_secs != precision.as_secs() {
                    warn!(
                        stored_secs,
                        configured_secs = precision.as_secs(),
                        "Usage store was created with a different precision; existing rows will be reported at the configured width"
                    );
                }
            }
            None => {
                db.put_cf(cf, META_PRECISION, precision.as_secs().to_be_bytes())
                    .map_err(|e| {
                        StorageError::Schema(format!("Failed to store precision: {}", e))
                    })?;
            }
        }
        Ok(())
    }

    /// Run `f` against the open database, or fail with [`StorageError::Closed`].
    fn with_db<T>(
        &self,
        f: impl FnOnce(&DB) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let guard = self.db.read().unwrap_or_else(PoisonError::into_inner);
        let db = guard.as_ref().ok_or(StorageError::Closed)?;
        f(db)
    }

    /// Bucket width this ledger was opened with.
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Filesystem location of the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Record that every key in `keys` is active in the current bucket.
    ///
    /// The clock is sampled once, so all keys of one call share a bucket.
    /// Keys already recorded for that bucket are left untouched; duplicates
    /// inside `keys` are collapsed. New rows are committed as one atomic
    /// batch, so on error nothing from this call is stored.
    pub fn record_usage<K: AsRef<str>>(&self, keys: &[K]) -> Result<(), StorageError> {
        let now = self.clock.now();
        self.record_usage_at(keys, now).map(|_| ())
    }

    /// Record `keys` into the bucket containing `at`.
    ///
    /// Returns the number of rows that were newly inserted.
    pub fn record_usage_at<K: AsRef<str>>(
        &self,
        keys: &[K],
        at: DateTime<Utc>,
    ) -> Result<usize, StorageError> {
        let bucket = self.precision.bucket_of(at);
        check_bucket(bucket)?;

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.with_db(|db| {
            let by_time = cf_handle(db, CF_USAGE_BY_TIME)?;
            let by_key = cf_handle(db, CF_USAGE_BY_KEY)?;

            let unique: BTreeSet<&str> = keys.iter().map(|k| k.as_ref()).collect();
            let mut batch = WriteBatch::default();
            let mut inserted = 0usize;

            for key in unique {
                let time_key = TimeKey::new(bucket, key).to_bytes();
                let existing = db.get_pinned_cf(by_time, &time_key).map_err(|e| {
                    error!(key, bucket, error = %e, "Failed to check usage row");
                    StorageError::transaction(
                        format!("failed to check usage for {} at {}", key, bucket),
                        e,
                    )
                })?;
                if existing.is_some() {
                    debug!(key, bucket, "Usage already recorded for bucket");
                    continue;
                }

                batch.put_cf(by_time, &time_key, b"");
                batch.put_cf(by_key, KeyIndexKey::new(key, bucket).to_bytes(), b"");
                inserted += 1;
                debug!(
                    key,
                    bucket,
                    precision_secs = self.precision.as_secs(),
                    "Recorded usage"
                );
            }

            if inserted > 0 {
                db.write(batch).map_err(|e| {
                    error!(bucket, rows = inserted, error = %e, "Failed to commit usage batch");
                    StorageError::transaction(
                        format!("failed to commit {} usage rows at {}", inserted, bucket),
                        e,
                    )
                })?;
            }
            Ok(inserted)
        })
    }

    /// Aggregate usage per key over `[from, to]`.
    ///
    /// Both ends are truncated to their bucket start first, so a bucket is
    /// either counted whole or not at all. A reversed range yields an empty
    /// report. Rows that fail to decode are logged and skipped.
    pub fn view_usage(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<UsageReport, StorageError> {
        let from_bucket = self.precision.bucket_of(from).max(0);
        let to_bucket = self.precision.bucket_of(to);

        self.with_db(|db| {
            let mut report = UsageReport::new();
            if to_bucket < from_bucket {
                debug!(from_bucket, to_bucket, "Empty usage range");
                return Ok(report);
            }

            let cf = cf_handle(db, CF_USAGE_BY_TIME)?;
            let start = TimeKey::prefix_start(from_bucket);
            let end = TimeKey::prefix_end(to_bucket);

            let mut counts: HashMap<String, u64> = HashMap::new();
            let iter = db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
            for item in iter {
                let (key, _) = item.map_err(|e| StorageError::query("failed to scan usage rows", e))?;
                if key.as_ref() >= end.as_slice() {
                    break;
                }
                match TimeKey::from_bytes(&key).map(TimeKey::into_record) {
                    Ok(record) => *counts.entry(record.key).or_default() += 1,
                    Err(e) => warn!(error = %e, "Skipping undecodable usage row"),
                }
            }

            for (key, buckets) in counts {
                debug!(
                    key = %key,
                    buckets,
                    total_secs = self.precision.duration_for(buckets).as_secs(),
                    "Found usage"
                );
                report.add_buckets(key, buckets, self.precision);
            }
            Ok(report)
        })
    }

    /// Usage of a single key over `[from, to]`, served by the key index.
    ///
    /// Same truncation rules as [`UsageLedger::view_usage`]; unknown keys
    /// report zero.
    pub fn key_usage(
        &self,
        key: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Duration, StorageError> {
        let from_bucket = self.precision.bucket_of(from).max(0);
        let to_bucket = self.precision.bucket_of(to);

        self.with_db(|db| {
            if to_bucket < from_bucket {
                return Ok(Duration::ZERO);
            }

            let cf = cf_handle(db, CF_USAGE_BY_KEY)?;
            let start = KeyIndexKey::new(key, from_bucket).to_bytes();
            let end = KeyIndexKey::new(key, to_bucket).to_bytes();

            let mut buckets = 0u64;
            let iter = db.iterator_cf(cf, IteratorMode::From(&start, Direction::Forward));
            for item in iter {
                let (raw, _) =
                    item.map_err(|e| StorageError::query(format!("failed to scan usage of {}", key), e))?;
                if raw.as_ref() > end.as_slice() {
                    break;
                }
                match KeyIndexKey::from_bytes(&raw) {
                    Ok(_) => buckets += 1,
                    Err(e) => warn!(key, error = %e, "Skipping undecodable key index row"),
                }
            }
            Ok(self.precision.duration_for(buckets))
        })
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.with_db(|db| {
            for name in ALL_CF_NAMES {
                let cf = cf_handle(db, name)?;
                db.flush_cf(cf)
                    .map_err(|e| StorageError::transaction(format!("failed to flush {}", name), e))?;
            }
            Ok(())
        })
    }

    /// Trigger manual compaction on the usage column families.
    pub fn compact(&self) -> Result<(), StorageError> {
        self.with_db(|db| {
            info!("Starting usage store compaction...");
            for name in [CF_USAGE_BY_TIME, CF_USAGE_BY_KEY] {
                let cf = cf_handle(db, name)?;
                db.compact_range_cf::<&[u8], &[u8]>(cf, None, None);
            }
            info!("Compaction complete");
            Ok(())
        })
    }

    /// Get ledger statistics.
    pub fn stats(&self) -> Result<LedgerStats, StorageError> {
        self.with_db(|db| {
            let by_time = cf_handle(db, CF_USAGE_BY_TIME)?;
            let by_key = cf_handle(db, CF_USAGE_BY_KEY)?;

            let mut stats = LedgerStats {
                precision_secs: self.precision.as_secs(),
                ..Default::default()
            };

            for item in db.iterator_cf(by_time, IteratorMode::Start) {
                let (raw, _) = item.map_err(|e| StorageError::query("failed to count usage rows", e))?;
                stats.row_count += 1;
                if let Ok(record) = TimeKey::from_bytes(&raw).map(TimeKey::into_record) {
                    stats.earliest_bucket.get_or_insert(record.bucket);
                    stats.latest_bucket = Some(record.bucket);
                }
            }

            // Key index is sorted by key, so each distinct key is one run
            let mut last_key: Option<String> = None;
            for item in db.iterator_cf(by_key, IteratorMode::Start) {
                let (raw, _) = item.map_err(|e| StorageError::query("failed to count usage keys", e))?;
                if let Ok(record) = KeyIndexKey::from_bytes(&raw).map(KeyIndexKey::into_record) {
                    if last_key.as_deref() != Some(record.key.as_str()) {
                        stats.key_count += 1;
                        last_key = Some(record.key);
                    }
                }
            }

            stats.disk_usage_bytes = Self::disk_usage(db.path());
            Ok(stats)
        })
    }

    fn disk_usage(path: &Path) -> u64 {
        std::fs::read_dir(path)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Flush and release the store.
    ///
    /// Later calls on this ledger return [`StorageError::Closed`]. Closing
    /// twice only logs a warning.
    pub fn close(&self) {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut guard = self.db.write().unwrap_or_else(PoisonError::into_inner);

        let Some(db) = guard.take() else {
            warn!(path = ?self.path, "Usage ledger already closed");
            return;
        };

        for name in ALL_CF_NAMES {
            if let Some(cf) = db.cf_handle(name) {
                if let Err(e) = db.flush_cf(cf) {
                    error!(cf = name, error = %e, "Failed to flush usage store on close");
                }
            }
        }
        drop(db);
        info!(path = ?self.path, "Closed usage ledger");
    }
}

/// Statistics about the ledger.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct LedgerStats {
    /// Number of (bucket, key) rows
    pub row_count: u64,
    /// Number of distinct keys
    pub key_count: u64,
    /// Start of the oldest bucket with usage
    pub earliest_bucket: Option<i64>,
    /// Start of the newest bucket with usage
    pub latest_bucket: Option<i64>,
    /// Bucket width the ledger is open with
    pub precision_secs: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use ledger_types::ManualClock;
    use rand::Rng;
    use tempfile::TempDir;

    /// 2024-01-29T15:00:00Z, on a 5 minute boundary
    const T0: i64 = 1_706_540_400;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn create_test_ledger(precision_secs: u64, start: i64) -> (UsageLedger, Arc<ManualClock>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(at(start)));
        let ledger = UsageLedger::open_with_clock(
            temp_dir.path(),
            Precision::from_secs(precision_secs).unwrap(),
            clock.clone(),
        )
        .unwrap();
        (ledger, clock, temp_dir)
    }

    fn random_pubkey(rng: &mut impl Rng) -> String {
        let mut bytes = [0u8; 48];
        rng.fill(&mut bytes[..]);
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        format!("0x{}", hex)
    }

    #[test]
    fn test_open_creates_column_families() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        let guard = ledger.db.read().unwrap();
        let db = guard.as_ref().unwrap();
        for cf_name in ALL_CF_NAMES {
            assert!(db.cf_handle(cf_name).is_some(), "CF {} should exist", cf_name);
        }
    }

    #[test]
    fn test_record_usage_uses_clock_bucket() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0 + 42);
        ledger.record_usage(&["v0"]).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.row_count, 1);
        assert_eq!(stats.earliest_bucket, Some(T0));
    }

    #[test]
    fn test_idempotent_within_bucket() {
        let (ledger, clock, _temp) = create_test_ledger(300, T0);

        assert_eq!(ledger.record_usage_at(&["v0"], at(T0 + 10)).unwrap(), 1);
        assert_eq!(ledger.record_usage_at(&["v0"], at(T0 + 200)).unwrap(), 0);
        clock.advance(ChronoDuration::seconds(299));
        ledger.record_usage(&["v0"]).unwrap();

        let report = ledger.view_usage(at(T0 - 3600), at(T0 + 3600)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_duplicate_keys_in_one_call() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);

        let inserted = ledger.record_usage_at(&["v0", "v1", "v0", "v0"], at(T0)).unwrap();
        assert_eq!(inserted, 2);

        let report = ledger.view_usage(at(T0), at(T0)).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_empty_key_list_is_noop() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        let keys: [&str; 0] = [];
        ledger.record_usage(&keys).unwrap();
        assert_eq!(ledger.stats().unwrap().row_count, 0);
    }

    #[test]
    fn test_usage_across_buckets() {
        let (ledger, clock, _temp) = create_test_ledger(300, T0);
        let mut rng = rand::rng();
        let validators: Vec<String> = (0..10).map(|_| random_pubkey(&mut rng)).collect();

        ledger.record_usage(&validators[0..5]).unwrap();
        clock.advance(ChronoDuration::minutes(6));
        ledger.record_usage(&validators).unwrap();

        let now = clock.now();
        let report = ledger
            .view_usage(now - ChronoDuration::hours(2), now + ChronoDuration::hours(2))
            .unwrap();

        assert_eq!(report.len(), 10);
        assert_eq!(report.get(&validators[0]), Some(Duration::from_secs(600)));
        assert_eq!(report.get(&validators[4]), Some(Duration::from_secs(600)));
        assert_eq!(report.get(&validators[5]), Some(Duration::from_secs(300)));
        assert_eq!(report.get(&validators[9]), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_quantization_two_second_buckets() {
        let (ledger, clock, _temp) = create_test_ledger(2, 1_000);
        let validators = ["0x010203".to_string()];

        for _ in 0..3 {
            clock.advance(ChronoDuration::seconds(1));
            ledger.record_usage(&validators).unwrap();
        }

        let now = clock.now();
        let report = ledger
            .view_usage(now - ChronoDuration::minutes(3), now + ChronoDuration::minutes(1))
            .unwrap();
        assert_eq!(report.get("0x010203"), Some(Duration::from_secs(4)));
    }

    #[test]
    fn test_reported_durations_are_multiples_of_precision() {
        let (ledger, clock, _temp) = create_test_ledger(7, 10_000);
        for step in 0..25 {
            clock.advance(ChronoDuration::seconds(3));
            let keys: Vec<String> = (0..(step % 4 + 1)).map(|i| format!("k{}", i)).collect();
            ledger.record_usage(&keys).unwrap();
        }

        let report = ledger.view_usage(at(0), clock.now()).unwrap();
        assert!(!report.is_empty());
        for (_, duration) in report.iter() {
            assert_eq!(duration.as_secs() % 7, 0);
            assert!(duration.as_secs() > 0);
        }
    }

    #[test]
    fn test_unrecorded_keys_are_absent() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["a", "b"]).unwrap();

        let report = ledger.view_usage(at(T0), at(T0 + 60)).unwrap();
        assert!(report.contains_key("a"));
        assert!(report.contains_key("b"));
        assert!(!report.contains_key("c"));
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_empty_range_returns_empty_report() {
        let (ledger, clock, _temp) = create_test_ledger(300, T0);
        let now = clock.now();
        let report = ledger
            .view_usage(now - ChronoDuration::hours(1), now - ChronoDuration::minutes(30))
            .unwrap();
        assert_eq!(report.len(), 0);
    }

    #[test]
    fn test_range_outside_recorded_buckets() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0"]).unwrap();

        assert!(ledger.view_usage(at(T0 + 300), at(T0 + 3600)).unwrap().is_empty());
        assert!(ledger.view_usage(at(T0 - 3600), at(T0 - 1)).unwrap().is_empty());
    }

    #[test]
    fn test_reversed_range_returns_empty_report() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0"]).unwrap();

        let report = ledger.view_usage(at(T0 + 3600), at(T0 - 3600)).unwrap();
        assert!(report.is_empty());
        assert_eq!(
            ledger.key_usage("v0", at(T0 + 3600), at(T0 - 3600)).unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn test_range_endpoints_inside_bucket() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage_at(&["v0"], at(T0 + 100)).unwrap();

        // Both ends strictly inside the bucket, neither covers the row instant
        let report = ledger.view_usage(at(T0 + 150), at(T0 + 299)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));

        let report = ledger.view_usage(at(T0 + 1), at(T0 + 1)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));

        let report = ledger.view_usage(at(T0 + 300), at(T0 + 599)).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_query_before_epoch_is_clamped() {
        let (ledger, _clock, _temp) = create_test_ledger(300, 600);
        ledger.record_usage(&["v0"]).unwrap();

        let report = ledger.view_usage(at(-10_000), at(900)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));
        assert!(ledger.view_usage(at(-10_000), at(-1)).unwrap().is_empty());
    }

    #[test]
    fn test_record_before_epoch_is_rejected() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        let err = ledger.record_usage_at(&["v0"], at(-5)).unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        assert_eq!(ledger.stats().unwrap().row_count, 0);
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        let ledger = Arc::new(ledger);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let ledger = Arc::clone(&ledger);
                scope.spawn(move || {
                    for _ in 0..25 {
                        ledger.record_usage(&["shared", "also-shared"]).unwrap();
                    }
                });
            }
        });

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.row_count, 2);
        let report = ledger.view_usage(at(T0), at(T0)).unwrap();
        assert_eq!(report.get("shared"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_undecodable_row_is_skipped() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0", "v1"]).unwrap();

        {
            let guard = ledger.db.read().unwrap();
            let db = guard.as_ref().unwrap();
            let cf = db.cf_handle(CF_USAGE_BY_TIME).unwrap();
            let mut corrupt = TimeKey::prefix_start(T0);
            corrupt.extend_from_slice(&[0xff, 0xfe]);
            db.put_cf(cf, corrupt, b"").unwrap();
        }

        let report = ledger.view_usage(at(T0), at(T0)).unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(report.get("v1"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_key_usage_uses_key_index() {
        let (ledger, clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["ab", "ab:c"]).unwrap();
        clock.advance(ChronoDuration::minutes(5));
        ledger.record_usage(&["ab"]).unwrap();
        clock.advance(ChronoDuration::minutes(5));
        ledger.record_usage(&["ab"]).unwrap();

        let end = clock.now();
        assert_eq!(
            ledger.key_usage("ab", at(T0), end).unwrap(),
            Duration::from_secs(900)
        );
        assert_eq!(
            ledger.key_usage("ab", at(T0 + 301), at(T0 + 599)).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            ledger.key_usage("ab:c", at(T0), end).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(ledger.key_usage("a", at(T0), end).unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_stats() {
        let (ledger, clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0", "v1"]).unwrap();
        clock.advance(ChronoDuration::minutes(10));
        ledger.record_usage(&["v0", "v2"]).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.row_count, 4);
        assert_eq!(stats.key_count, 3);
        assert_eq!(stats.earliest_bucket, Some(T0));
        assert_eq!(stats.latest_bucket, Some(T0 + 600));
        assert_eq!(stats.precision_secs, 300);
    }

    #[test]
    fn test_flush_and_compact() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0"]).unwrap();
        ledger.flush().unwrap();
        ledger.compact().unwrap();

        let report = ledger.view_usage(at(T0), at(T0)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.record_usage(&["v0"]).unwrap();

        ledger.close();
        assert!(ledger.is_closed());
        ledger.close();
        assert!(ledger.is_closed());
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (ledger, _clock, _temp) = create_test_ledger(300, T0);
        ledger.close();

        assert!(matches!(
            ledger.record_usage(&["v0"]),
            Err(StorageError::Closed)
        ));
        assert!(matches!(
            ledger.view_usage(at(T0), at(T0)),
            Err(StorageError::Closed)
        ));
        assert!(matches!(ledger.stats(), Err(StorageError::Closed)));
    }

    #[test]
    fn test_reopen_preserves_rows() {
        let temp_dir = TempDir::new().unwrap();
        let precision = Precision::from_secs(300).unwrap();
        let clock = Arc::new(ManualClock::new(at(T0)));

        let ledger = UsageLedger::open_with_clock(temp_dir.path(), precision, clock.clone()).unwrap();
        ledger.record_usage(&["v0"]).unwrap();
        ledger.close();

        let ledger = UsageLedger::open_with_clock(temp_dir.path(), precision, clock).unwrap();
        ledger.record_usage(&["v0"]).unwrap();
        let report = ledger.view_usage(at(T0), at(T0)).unwrap();
        assert_eq!(report.get("v0"), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_reopen_with_other_precision_keeps_stored_precision() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = UsageLedger::open(temp_dir.path(), Precision::from_secs(300).unwrap()).unwrap();
        ledger.close();

        let ledger = UsageLedger::open(temp_dir.path(), Precision::from_secs(60).unwrap()).unwrap();
        assert_eq!(ledger.precision().as_secs(), 60);

        let guard = ledger.db.read().unwrap();
        let db = guard.as_ref().unwrap();
        let cf = db.cf_handle(CF_LEDGER_META).unwrap();
        let stored = db.get_cf(cf, META_PRECISION).unwrap().unwrap();
        assert_eq!(stored, 300u64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_open_fails_when_path_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("not-a-dir");
        std::fs::write(&file_path, b"occupied").unwrap();

        let result = UsageLedger::open(&file_path, Precision::DEFAULT);
        assert!(matches!(result, Err(StorageError::Connection { .. })));
    }
}
