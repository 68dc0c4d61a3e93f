//! Usage ledger CLI library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (record, view, key, stats, compact)

pub mod cli;
pub mod commands;

pub use cli::{parse_time, Cli, Commands};
pub use commands::{
    execute, handle_compact, handle_key, handle_record, handle_stats, handle_view, init_logging,
    load_settings, open_ledger,
};
