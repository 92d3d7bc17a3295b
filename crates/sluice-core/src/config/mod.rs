//! Configuration for the sluice engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::delivery::DEFAULT_DELIVERY_TIMEOUT;
use crate::error::{SluiceError, SluiceResult};
use crate::feed::DEFAULT_FEED_CAPACITY;
use crate::multiplexer::DEFAULT_MAX_CONCURRENT_DISPATCHES;

/// Special database path that selects an in-memory SQLite database.
pub const IN_MEMORY_DB: &str = ":memory:";

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the SQLite database, or `:memory:`.
    pub database_path: PathBuf,
    /// Webhook request timeout in seconds.
    pub delivery_timeout_secs: u64,
    /// Upper bound on notifications dispatched concurrently.
    pub max_concurrent_dispatches: usize,
    /// Per-table change feed buffer size.
    pub feed_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let sluice_dir = dirs::home_dir()
            .map(|h| h.join(".sluice"))
            .unwrap_or_else(|| PathBuf::from(".sluice"));

        Self {
            database_path: sluice_dir.join("sluice.db"),
            delivery_timeout_secs: DEFAULT_DELIVERY_TIMEOUT.as_secs(),
            max_concurrent_dispatches: DEFAULT_MAX_CONCURRENT_DISPATCHES,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Use an in-memory database.
    pub fn in_memory(mut self) -> Self {
        self.database_path = PathBuf::from(IN_MEMORY_DB);
        self
    }

    /// Set the database path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    /// Set the webhook timeout (minimum one second).
    pub fn with_delivery_timeout_secs(mut self, secs: u64) -> Self {
        self.delivery_timeout_secs = secs.max(1);
        self
    }

    /// Set the dispatch concurrency bound (minimum one).
    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max.max(1);
        self
    }

    /// Set the per-table feed capacity (minimum one).
    pub fn with_feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = capacity.max(1);
        self
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_DB
    }

    /// Load configuration from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> SluiceResult<Self> {
        load_file(path)
    }

    /// Create config from environment variables.
    ///
    /// Reads:
    /// - `SLUICE_DB_PATH` (default: `~/.sluice/sluice.db`)
    /// - `SLUICE_DELIVERY_TIMEOUT_SECS` (default: 10)
    /// - `SLUICE_MAX_CONCURRENT_DISPATCHES` (default: 64)
    /// - `SLUICE_FEED_CAPACITY` (default: 1024)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Override fields from a variable lookup. Unparseable values are
    /// ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("SLUICE_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("SLUICE_DELIVERY_TIMEOUT_SECS").and_then(|v| v.parse::<u64>().ok()) {
            self.delivery_timeout_secs = secs.max(1);
        }
        if let Some(max) = lookup("SLUICE_MAX_CONCURRENT_DISPATCHES").and_then(|v| v.parse::<usize>().ok()) {
            self.max_concurrent_dispatches = max.max(1);
        }
        if let Some(capacity) = lookup("SLUICE_FEED_CAPACITY").and_then(|v| v.parse::<usize>().ok()) {
            self.feed_capacity = capacity.max(1);
        }
    }
}

/// Deserialize any config type from a `.toml` or `.json` file.
pub fn load_file<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> SluiceResult<T> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let ext = path.as_ref().extension().and_then(|e| e.to_str());

    match ext {
        Some("toml") => toml::from_str(&content).map_err(|e| SluiceError::Configuration(e.to_string())),
        Some("json") => {
            serde_json::from_str(&content).map_err(|e| SluiceError::Configuration(e.to_string()))
        }
        _ => Err(SluiceError::Configuration(
            "Unsupported config file format. Use .toml or .json".to_string(),
        )),
    }
}
