//! Server configuration.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sluice_core::config::load_file;
use sluice_core::{EngineConfig, SluiceResult};
use thiserror::Error;

/// Errors raised while assembling the server configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid listen address {0}")]
    Address(String),
}

/// Configuration for the server binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> SluiceResult<Self> {
        load_file(path)
    }

    /// Create config from environment variables.
    ///
    /// Reads `SLUICE_HOST` (default `0.0.0.0`) and `SLUICE_PORT` (default
    /// 3000) on top of the engine variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from a variable lookup.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("SLUICE_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SLUICE_PORT") {
            self.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SLUICE_PORT",
                value: port,
            })?;
        }
        self.engine.apply_env(lookup);
        Ok(())
    }

    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = format!("{}:{}", self.host, self.port);
        raw.parse().map_err(|_| ConfigError::Address(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("SLUICE_HOST", "127.0.0.1"),
            ("SLUICE_PORT", "8089"),
            ("SLUICE_DB_PATH", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.addr().unwrap().to_string(), "127.0.0.1:8089");
        assert!(config.engine.is_in_memory());
    }

    #[test]
    fn test_bad_port() {
        let mut config = ServerConfig::default();
        let err = config
            .apply_env(|key| (key == "SLUICE_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "SLUICE_PORT", .. }));
    }

    #[test]
    fn test_flattened_json() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 4000, "database_path": ":memory:"}"#).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.host, "0.0.0.0");
        assert!(config.engine.is_in_memory());
    }
}
