//! Configuration for the ledger and its HTTP server

use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::blockchain::MAX_DIFFICULTY;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "POW_LEDGER_CONFIG";

/// File read when `CONFIG_ENV` is unset
pub const DEFAULT_CONFIG_PATH: &str = "ledger.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub server: ServerConfig,
}

/// Consensus parameters, fixed for the lifetime of a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Amount minted for every mined block
    pub reward: f64,

    /// Leading hex zeros required of a block hash
    pub difficulty: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            reward: 1.0,
            difficulty: 3,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reward.is_finite() || self.reward <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "ledger.reward must be a positive number, got {}",
                self.reward
            )));
        }

        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "ledger.difficulty must be at most {}, got {}",
                MAX_DIFFICULTY, self.difficulty
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ledger.validate()?;

        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must be set".to_string()));
        }

        Ok(())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded config from {}", path.display());

        Ok(config)
    }
}

/// Loads the configuration named by `POW_LEDGER_CONFIG`, or `ledger.toml`
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    Config::load_from_path(path)
}
