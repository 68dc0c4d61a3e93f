//! Usage Ledger CLI
//!
//! Records which keys were active in which time buckets and reports
//! accumulated usage.
//!
//! # Usage
//!
//! ```bash
//! usage-ledger record KEY [KEY...] [--at TIME]
//! usage-ledger view [--from TIME] [--to TIME] [--json]
//! usage-ledger key KEY [--from TIME] [--to TIME]
//! usage-ledger stats [--json]
//! usage-ledger compact
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/usage-ledger/config.toml)
//! 3. Environment variables (LEDGER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use ledger_cli::{execute, init_logging, load_settings, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(&cli)?;
    init_logging(&settings.log_level)?;

    let stdout = std::io::stdout();
    execute(&cli.command, &settings, &mut stdout.lock())
}
