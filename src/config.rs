//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::domain::{Error, Result};

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Backing store configuration
    pub store: StoreConfig,

    /// Business rules
    pub ledger: LedgerConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "balance-ledger".to_string(),
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Backing store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// PostgreSQL connection string (postgres backend only)
    pub database_url: Option<String>,

    /// Connection pool size
    pub max_connections: u32,

    /// How long a unit-of-work waits for a balance row lock before failing
    pub lock_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            lock_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Business rules enforced by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest accepted comment, in characters
    pub max_comment_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_comment_len: 500,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive; RUST_LOG takes precedence
    pub level: String,

    /// Emit JSON lines instead of plain text
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Reads `LEDGER_CONFIG` when set, then applies environment overrides
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("LEDGER_CONFIG") {
            Ok(path) => Config::from_file(path)?,
            Err(_) => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("LEDGER_DATABASE_URL") {
            self.store.database_url = Some(url);
        }

        if let Ok(ms) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            self.store.lock_timeout_ms = parse_env("LEDGER_LOCK_TIMEOUT_MS", &ms)?;
        }

        if let Ok(len) = std::env::var("LEDGER_MAX_COMMENT_LEN") {
            self.ledger.max_comment_len = parse_env("LEDGER_MAX_COMMENT_LEN", &len)?;
        }

        if let Ok(level) = std::env::var("LEDGER_LOG_LEVEL") {
            self.log.level = level;
        }

        if let Ok(json) = std::env::var("LEDGER_LOG_JSON") {
            self.log.json = parse_env("LEDGER_LOG_JSON", &json)?;
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("Invalid value for {}: {}", name, value)))
}
