//! Configuration loading for the usage ledger.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/usage-ledger/config.toml.

use config::{Config, Environment, File};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::LedgerError;
use crate::usage::Precision;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB directory holding usage rows
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Bucket width in seconds.
    ///
    /// Must stay the same for the life of the data in `db_path`.
    #[serde(default = "default_precision_secs")]
    pub precision_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "usage-ledger")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_precision_secs() -> u64 {
    Precision::DEFAULT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            precision_secs: default_precision_secs(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/usage-ledger/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (LEDGER_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, LedgerError> {
        let config_dir = ProjectDirs::from("", "", "usage-ledger")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| LedgerError::Config(e.to_string()))?
            .set_default("precision_secs", default_precision_secs() as i64)
            .map_err(|e| LedgerError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| LedgerError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // LEDGER_DB_PATH, LEDGER_PRECISION_SECS, LEDGER_LOG_LEVEL
        builder = builder.add_source(
            Environment::with_prefix("LEDGER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| LedgerError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| LedgerError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.db_path.trim().is_empty() {
            return Err(LedgerError::Config("db_path must not be empty".to_string()));
        }
        self.precision().map(|_| ())
    }

    /// Configured bucket width.
    pub fn precision(&self) -> Result<Precision, LedgerError> {
        Precision::from_secs(self.precision_secs)
    }

    /// Expand ~ in db_path to the user's home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(dirs) = BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
