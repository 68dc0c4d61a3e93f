//! Command implementations for the usage ledger CLI.
//!
//! Handles:
//! - record: Record usage for keys in the current (or given) bucket
//! - view: Aggregate usage per key over a range
//! - key: Usage of a single key over a range
//! - stats / compact: Store administration

use std::fs;
use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::json;
use tracing::info;

use ledger_storage::UsageLedger;
use ledger_types::Settings;

use crate::cli::{Cli, Commands};

/// Default lookback for range queries without `--from`.
const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Load configuration and apply CLI overrides (highest precedence).
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(db_path) = &cli.db_path {
        settings.db_path = db_path.clone();
    }
    if let Some(precision_secs) = cli.precision_secs {
        settings.precision_secs = precision_secs;
    }
    if let Some(log_level) = &cli.log_level {
        settings.log_level = log_level.clone();
    }

    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

/// Install the global tracing subscriber.
///
/// RUST_LOG takes precedence over the configured level.
pub fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open the ledger described by `settings`, creating its directory if needed.
pub fn open_ledger(settings: &Settings) -> Result<UsageLedger> {
    let db_path = settings.expanded_db_path();
    let precision = settings.precision().context("Invalid precision")?;

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    UsageLedger::open(&db_path, precision)
        .with_context(|| format!("Failed to open usage ledger at {}", db_path.display()))
}

/// Open the ledger, run `command`, and close the ledger again.
pub fn execute(command: &Commands, settings: &Settings, out: &mut impl Write) -> Result<()> {
    let ledger = open_ledger(settings)?;
    let result = dispatch(&ledger, command, out);
    ledger.close();
    result
}

fn dispatch(ledger: &UsageLedger, command: &Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::Record { keys, at } => handle_record(ledger, keys, *at, out),
        Commands::View { from, to, json } => {
            let (from, to) = resolve_range(*from, *to);
            handle_view(ledger, from, to, *json, out)
        }
        Commands::Key { key, from, to } => {
            let (from, to) = resolve_range(*from, *to);
            handle_key(ledger, key, from, to, out)
        }
        Commands::Stats { json } => handle_stats(ledger, *json, out),
        Commands::Compact => handle_compact(ledger, out),
    }
}

/// Fill in missing range ends: `to` defaults to now, `from` to 24h before `to`.
pub fn resolve_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let to = to.unwrap_or_else(Utc::now);
    let from = from.unwrap_or_else(|| to - ChronoDuration::hours(DEFAULT_LOOKBACK_HOURS));
    (from, to)
}

/// Record usage for `keys`.
pub fn handle_record(
    ledger: &UsageLedger,
    keys: &[String],
    at: Option<DateTime<Utc>>,
    out: &mut impl Write,
) -> Result<()> {
    match at {
        Some(at) => {
            let inserted = ledger
                .record_usage_at(keys, at)
                .context("Failed to record usage")?;
            let bucket = ledger.precision().bucket_of(at);
            info!(inserted, bucket, "Recorded usage");
            writeln!(
                out,
                "Recorded {} new of {} key(s) in bucket {}",
                inserted,
                keys.len(),
                format_time(bucket)
            )?;
        }
        None => {
            ledger.record_usage(keys).context("Failed to record usage")?;
            writeln!(out, "Recorded usage for {} key(s)", keys.len())?;
        }
    }
    Ok(())
}

/// Print per-key usage over `[from, to]`.
pub fn handle_view(
    ledger: &UsageLedger,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    as_json: bool,
    out: &mut impl Write,
) -> Result<()> {
    let report = ledger
        .view_usage(from, to)
        .context("Failed to view usage")?;

    if as_json {
        let body = json!({
            "from": from.to_rfc3339_opts(SecondsFormat::Secs, true),
            "to": to.to_rfc3339_opts(SecondsFormat::Secs, true),
            "precision_secs": ledger.precision().as_secs(),
            "usage": report,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&body)?)?;
        return Ok(());
    }

    writeln!(
        out,
        "Usage from {} to {} (precision {})",
        from.to_rfc3339_opts(SecondsFormat::Secs, true),
        to.to_rfc3339_opts(SecondsFormat::Secs, true),
        ledger.precision()
    )?;
    if report.is_empty() {
        writeln!(out, "  (no usage recorded)")?;
        return Ok(());
    }
    for (key, duration) in report.iter() {
        writeln!(out, "  {}  {}", key, format_duration(duration))?;
    }
    writeln!(
        out,
        "{} key(s), {} total",
        report.len(),
        format_duration(report.total())
    )?;
    Ok(())
}

/// Print usage of one key over `[from, to]`.
pub fn handle_key(
    ledger: &UsageLedger,
    key: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    out: &mut impl Write,
) -> Result<()> {
    let duration = ledger
        .key_usage(key, from, to)
        .with_context(|| format!("Failed to look up usage of {}", key))?;
    writeln!(out, "{}  {}", key, format_duration(duration))?;
    Ok(())
}

/// Print ledger statistics.
pub fn handle_stats(ledger: &UsageLedger, as_json: bool, out: &mut impl Write) -> Result<()> {
    let stats = ledger.stats().context("Failed to read ledger statistics")?;

    if as_json {
        writeln!(out, "{}", serde_json::to_string_pretty(&stats)?)?;
        return Ok(());
    }

    writeln!(out, "Usage Ledger Statistics")?;
    writeln!(out, "=======================")?;
    writeln!(out, "Path:          {}", ledger.path().display())?;
    writeln!(out, "Precision:     {}s", stats.precision_secs)?;
    writeln!(out, "Rows:          {}", stats.row_count)?;
    writeln!(out, "Keys:          {}", stats.key_count)?;
    if let (Some(first), Some(last)) = (stats.earliest_bucket, stats.latest_bucket) {
        writeln!(out, "First bucket:  {}", format_time(first))?;
        writeln!(out, "Last bucket:   {}", format_time(last))?;
    }
    writeln!(out, "Disk usage:    {} bytes", stats.disk_usage_bytes)?;
    Ok(())
}

/// Compact the usage store.
pub fn handle_compact(ledger: &UsageLedger, out: &mut impl Write) -> Result<()> {
    ledger.compact().context("Compaction failed")?;
    writeln!(out, "Compaction complete")?;
    Ok(())
}

/// Render a bucket start as RFC 3339.
fn format_time(bucket: i64) -> String {
    DateTime::from_timestamp(bucket, 0)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| bucket.to_string())
}

/// Render a duration as `1h05m00s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, mins, secs) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if hours > 0 {
        format!("{}h{:02}m{:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m{:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
