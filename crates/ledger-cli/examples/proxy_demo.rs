//! Demo: Several request handlers sharing one usage ledger
//!
//! Usage:
//! ```bash
//! cargo run --example proxy_demo
//! ```
//!
//! Opens a throwaway ledger with 2 second buckets, lets four worker threads
//! record the validators each "request" touched, then prints the report.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use ledger_storage::UsageLedger;
use ledger_types::Precision;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let dir = tempfile::TempDir::new()?;
    let ledger = Arc::new(UsageLedger::open(dir.path(), Precision::from_secs(2)?)?);
    let started = Utc::now();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                for request in 0..5 {
                    let validators: Vec<String> = (0..=worker)
                        .map(|i| format!("0x{:02x}{:02x}", worker, i))
                        .collect();
                    let mut result = ledger.record_usage(&validators);
                    if matches!(&result, Err(e) if e.is_retryable()) {
                        result = ledger.record_usage(&validators);
                    }
                    if let Err(e) = result {
                        // Undercounted, not fatal
                        eprintln!("worker {} request {}: {}", worker, request, e);
                    }
                    thread::sleep(Duration::from_millis(700));
                }
            })
        })
        .collect();

    for worker in workers {
        let _ = worker.join();
    }

    let report = ledger.view_usage(started - ChronoDuration::minutes(1), Utc::now())?;
    println!("Usage over the last run ({} buckets):", ledger.precision());
    for (key, duration) in report.iter() {
        println!("  {}  {:?}", key, duration);
    }

    ledger.close();
    Ok(())
}
