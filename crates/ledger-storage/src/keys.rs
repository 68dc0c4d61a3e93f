//! Key encoding and decoding for storage layer.
//!
//! Time index format: `t:{bucket:020}:{key}`
//! Key index format:  `k:{key_len:010}:{key}:{bucket:020}`
//!
//! - bucket: bucket start in seconds since the Unix epoch, zero-padded to 20
//!   digits so lexicographic order matches numeric order
//! - key_len: byte length of the usage key, so that the prefix for one key can
//!   never match a longer key sharing the same leading bytes
//!
//! Stored buckets are never negative. Values in both indexes are empty; the
//! key carries the whole row.

use ledger_types::UsageRecord;

use crate::error::StorageError;

/// Metadata key remembering the precision a store was created with
pub const META_PRECISION: &[u8] = b"precision_secs";

/// Reject buckets the key format cannot order correctly.
pub fn check_bucket(bucket: i64) -> Result<(), StorageError> {
    if bucket < 0 {
        return Err(StorageError::InvalidInput(format!(
            "bucket {bucket} is before the Unix epoch"
        )));
    }
    Ok(())
}

fn parse_bucket(digits: &[u8]) -> Result<i64, StorageError> {
    if digits.len() != 20 || !digits.iter().all(u8::is_ascii_digit) {
        return Err(StorageError::Decode(format!(
            "Invalid bucket: {}",
            String::from_utf8_lossy(digits)
        )));
    }
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            StorageError::Decode(format!(
                "Bucket out of range: {}",
                String::from_utf8_lossy(digits)
            ))
        })
}

fn parse_usage_key(bytes: &[u8]) -> Result<String, StorageError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| StorageError::Decode(format!("Invalid UTF-8 in usage key: {}", e)))
}

/// Row key in the time-ordered index.
/// Format: t:{bucket:020}:{key}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeKey {
    pub bucket: i64,
    pub key: String,
}

impl TimeKey {
    pub fn new(bucket: i64, key: impl Into<String>) -> Self {
        Self {
            bucket,
            key: key.into(),
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Self::prefix_start(self.bucket);
        bytes.extend_from_slice(self.key.as_bytes());
        bytes
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let invalid =
            || StorageError::Decode(format!("Invalid time key: {}", String::from_utf8_lossy(bytes)));

        let rest = bytes.strip_prefix(b"t:").ok_or_else(invalid)?;
        if rest.len() < 21 || rest[20] != b':' {
            return Err(invalid());
        }
        let bucket = parse_bucket(&rest[..20])?;
        let key = parse_usage_key(&rest[21..])?;

        Ok(Self { bucket, key })
    }

    /// Prefix of every row in `bucket`; also the inclusive scan start.
    pub fn prefix_start(bucket: i64) -> Vec<u8> {
        format!("t:{:020}:", bucket).into_bytes()
    }

    /// Exclusive scan end covering every row in `bucket`.
    ///
    /// `;` sorts immediately after `:`.
    pub fn prefix_end(bucket: i64) -> Vec<u8> {
        format!("t:{:020};", bucket).into_bytes()
    }

    pub fn into_record(self) -> UsageRecord {
        UsageRecord::new(self.bucket, self.key)
    }
}

/// Row key in the per-key index.
/// Format: k:{key_len:010}:{key}:{bucket:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyIndexKey {
    pub key: String,
    pub bucket: i64,
}

impl KeyIndexKey {
    pub fn new(key: impl Into<String>, bucket: i64) -> Self {
        Self {
            key: key.into(),
            bucket,
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Self::prefix(&self.key);
        bytes.extend_from_slice(format!("{:020}", self.bucket).as_bytes());
        bytes
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let invalid =
            || StorageError::Decode(format!("Invalid key index entry: {}", String::from_utf8_lossy(bytes)));

        let rest = bytes.strip_prefix(b"k:").ok_or_else(invalid)?;
        if rest.len() < 11 || rest[10] != b':' || !rest[..10].iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let key_len: usize = std::str::from_utf8(&rest[..10])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)?;

        let rest = &rest[11..];
        // key bytes, ':' separator, 20 bucket digits
        if rest.len() != key_len + 21 || rest[key_len] != b':' {
            return Err(invalid());
        }
        let key = parse_usage_key(&rest[..key_len])?;
        let bucket = parse_bucket(&rest[key_len + 1..])?;

        Ok(Self { key, bucket })
    }

    /// Prefix shared by every row of `key`.
    pub fn prefix(key: &str) -> Vec<u8> {
        format!("k:{:010}:{}:", key.len(), key).into_bytes()
    }

    pub fn into_record(self) -> UsageRecord {
        UsageRecord::new(self.bucket, self.key)
    }
}
