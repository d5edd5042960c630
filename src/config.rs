//! Configuration management for the Aurum node

use crate::error::{ChainError, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Coin identifier echoed in every peer envelope.
    #[serde(default = "default_coin")]
    pub coin: String,
    /// On the test network every well-formed proof of work is accepted.
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            coin: default_coin(),
            testnet: false,
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: default_db_path(),
        }
    }
}

fn default_coin() -> String {
    "aurum".to_string()
}

fn default_db_path() -> String {
    "./aurum.db".to_string()
}

/// Loads `config.toml` from the given path, falling back to defaults when
/// the file is absent.
pub fn load_config(path: &str) -> Result<Config> {
    let config_str = fs::read_to_string(path).unwrap_or_default();
    let config: Config = if config_str.is_empty() {
        Config::default()
    } else {
        toml::from_str(&config_str).map_err(|e| ChainError::Config(e.to_string()))?
    };

    if config.database.path.is_empty() {
        return Err(ChainError::Config(
            "database.path must be set in config.toml".to_string(),
        ));
    }
    if config.coin.is_empty() {
        return Err(ChainError::Config(
            "coin must be set in config.toml".to_string(),
        ));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_file_missing() {
        let config = load_config("/nonexistent/config.toml").unwrap();
        assert_eq!(config.coin, "aurum");
        assert!(!config.testnet);
        assert_eq!(config.database.path, "./aurum.db");
    }

    #[test]
    fn test_parse_overrides() {
        let config: Config = toml::from_str(
            r#"
            coin = "aurum-test"
            testnet = true

            [database]
            path = ":memory:"
            "#,
        )
        .unwrap();
        assert_eq!(config.coin, "aurum-test");
        assert!(config.testnet);
        assert_eq!(config.database.path, ":memory:");
    }
}
