//! Quantized usage types.
//!
//! Usage is recorded per fixed-width time bucket. A bucket is identified by its
//! start, expressed as whole seconds since the Unix epoch:
//!
//! ```text
//! bucket(t) = floor(t / precision) * precision
//! ```
//!
//! Buckets are anchored to the epoch rather than to first use, so two processes
//! configured with the same precision always agree on bucket boundaries.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::LedgerError;

/// Width of a usage bucket.
///
/// Always a positive whole number of seconds. Fixed for the life of a store:
/// reopening existing data with a different precision changes what every
/// stored row is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Precision {
    secs: u64,
}

impl Precision {
    /// Five minutes.
    pub const DEFAULT: Precision = Precision { secs: 300 };

    /// Create a precision of `secs` seconds.
    pub fn from_secs(secs: u64) -> Result<Self, LedgerError> {
        if secs == 0 {
            return Err(LedgerError::InvalidPrecision(
                "precision must be at least one second".to_string(),
            ));
        }
        if secs > i64::MAX as u64 {
            return Err(LedgerError::InvalidPrecision(format!(
                "precision of {secs}s does not fit a signed timestamp"
            )));
        }
        Ok(Self { secs })
    }

    /// Create a precision of `mins` minutes.
    pub fn from_mins(mins: u64) -> Result<Self, LedgerError> {
        Self::from_secs(mins.saturating_mul(60))
    }

    /// Bucket width in seconds.
    pub fn as_secs(&self) -> u64 {
        self.secs
    }

    /// Bucket width as a [`Duration`].
    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.secs)
    }

    /// Start of the bucket containing `timestamp_secs`.
    ///
    /// Uses floor division, so instants before the epoch round down as well.
    pub fn bucket_start(&self, timestamp_secs: i64) -> i64 {
        let width = self.secs as i64;
        timestamp_secs.div_euclid(width) * width
    }

    /// Start of the bucket containing `at`.
    pub fn bucket_of(&self, at: DateTime<Utc>) -> i64 {
        self.bucket_start(at.timestamp())
    }

    /// Total duration covered by `buckets` distinct buckets.
    pub fn duration_for(&self, buckets: u64) -> Duration {
        Duration::from_secs(self.secs.saturating_mul(buckets))
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.secs)
    }
}

impl TryFrom<u64> for Precision {
    type Error = LedgerError;

    fn try_from(secs: u64) -> Result<Self, Self::Error> {
        Self::from_secs(secs)
    }
}

impl From<Precision> for u64 {
    fn from(precision: Precision) -> Self {
        precision.secs
    }
}

impl TryFrom<Duration> for Precision {
    type Error = LedgerError;

    fn try_from(duration: Duration) -> Result<Self, Self::Error> {
        if duration.subsec_nanos() != 0 {
            return Err(LedgerError::InvalidPrecision(format!(
                "precision must be a whole number of seconds, got {duration:?}"
            )));
        }
        Self::from_secs(duration.as_secs())
    }
}

/// One persisted row: `key` was active at some point during `bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Bucket start, seconds since the Unix epoch
    pub bucket: i64,
    /// Opaque identifier (e.g. a validator public key)
    pub key: String,
}

impl UsageRecord {
    pub fn new(bucket: i64, key: impl Into<String>) -> Self {
        Self {
            bucket,
            key: key.into(),
        }
    }
}

impl fmt::Display for UsageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.key, self.bucket)
    }
}

/// Accumulated active duration per key over a queried range.
///
/// Keys without any bucket in range are absent rather than mapped to zero.
/// Every duration is a whole multiple of the ledger precision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageReport {
    usage: BTreeMap<String, Duration>,
}

impl UsageReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `buckets` buckets of `precision` width to `key`.
    ///
    /// Zero-bucket credits are ignored so absent keys stay absent.
    pub fn add_buckets(&mut self, key: impl Into<String>, buckets: u64, precision: Precision) {
        if buckets == 0 {
            return;
        }
        let entry = self.usage.entry(key.into()).or_default();
        *entry = entry.saturating_add(precision.duration_for(buckets));
    }

    /// Duration recorded for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Duration> {
        self.usage.get(key).copied()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.usage.contains_key(key)
    }

    /// Number of keys with recorded usage.
    pub fn len(&self) -> usize {
        self.usage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }

    /// Iterate `(key, duration)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.usage.iter().map(|(k, d)| (k.as_str(), *d))
    }

    /// Sum of all durations in the report.
    pub fn total(&self) -> Duration {
        self.usage
            .values()
            .fold(Duration::ZERO, |acc, d| acc.saturating_add(*d))
    }

    pub fn into_map(self) -> BTreeMap<String, Duration> {
        self.usage
    }
}

impl IntoIterator for UsageReport {
    type Item = (String, Duration);
    type IntoIter = std::collections::btree_map::IntoIter<String, Duration>;

    fn into_iter(self) -> Self::IntoIter {
        self.usage.into_iter()
    }
}

/// Serialized as `{ key: seconds }`.
impl Serialize for UsageReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.usage.iter().map(|(k, d)| (k, d.as_secs())))
    }
}
