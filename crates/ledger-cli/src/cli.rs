//! CLI argument parsing for the usage ledger.
//!
//! CLI flags override all other config sources.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

/// Usage Ledger
///
/// Records which keys were active in which time buckets and reports
/// accumulated usage over time ranges.
#[derive(Parser, Debug)]
#[command(name = "usage-ledger")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/usage-ledger/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    /// Override bucket width in seconds (must match the existing store)
    #[arg(long, global = true)]
    pub precision_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Ledger commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Record usage for one or more keys
    Record {
        /// Keys that were active
        #[arg(required = true)]
        keys: Vec<String>,

        /// Record into the bucket containing this time instead of now
        /// (RFC 3339 or Unix seconds)
        #[arg(long, value_parser = parse_time)]
        at: Option<DateTime<Utc>>,
    },

    /// Report usage per key over a time range
    View {
        /// Range start (RFC 3339 or Unix seconds, default: 24h ago)
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// Range end (RFC 3339 or Unix seconds, default: now)
        #[arg(long, value_parser = parse_time)]
        to: Option<DateTime<Utc>>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Report usage of a single key
    Key {
        /// Key to look up
        key: String,

        /// Range start (RFC 3339 or Unix seconds, default: 24h ago)
        #[arg(long, value_parser = parse_time)]
        from: Option<DateTime<Utc>>,

        /// Range end (RFC 3339 or Unix seconds, default: now)
        #[arg(long, value_parser = parse_time)]
        to: Option<DateTime<Utc>>,
    },

    /// Show ledger statistics
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Trigger RocksDB compaction
    Compact,
}

/// Parse a timestamp given as Unix seconds or RFC 3339.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| format!("timestamp out of range: {}", s));
    }
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid time '{}': {}", s, e))
}
