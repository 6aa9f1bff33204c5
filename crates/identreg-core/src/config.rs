use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

/// Upper bound accepted for `initial_capacity`.
pub const MAX_INITIAL_CAPACITY: usize = 1 << 20;

pub const ENV_INITIAL_CAPACITY: &str = "IDENTREG_INITIAL_CAPACITY";
pub const ENV_RECLAIM_INTERVAL: &str = "IDENTREG_RECLAIM_INTERVAL";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tuning knobs for an [`IdentRegistry`](crate::IdentRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Pre-sized capacity of the entry map and the free pool
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Run an automatic reclamation pass at most every N new allocations;
    /// passes are also spaced by a quarter of the tracked entry count.
    /// 0 disables automatic passes; only `IdentRegistry::reclaim` frees identifiers then.
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval: usize,
}

fn default_initial_capacity() -> usize {
    64
}

fn default_reclaim_interval() -> usize {
    1
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            initial_capacity: default_initial_capacity(),
            reclaim_interval: default_reclaim_interval(),
        }
    }
}

impl RegistryConfig {
    /// Load configuration with the following precedence:
    /// 1. Environment variables
    /// 2. Config file at `path`, if given
    /// 3. Defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        let config = config.apply_env_overrides();
        config.validate()?;

        info!(
            initial_capacity = config.initial_capacity,
            reclaim_interval = config.reclaim_interval,
            config_file = ?path,
            "Loaded identifier registry configuration"
        );
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Apply `IDENTREG_*` environment variable overrides
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_overrides_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_INITIAL_CAPACITY) {
            match raw.trim().parse() {
                Ok(value) => self.initial_capacity = value,
                Err(e) => warn!("Ignoring invalid {}={:?}: {}", ENV_INITIAL_CAPACITY, raw, e),
            }
        }
        if let Some(raw) = lookup(ENV_RECLAIM_INTERVAL) {
            match raw.trim().parse() {
                Ok(value) => self.reclaim_interval = value,
                Err(e) => warn!("Ignoring invalid {}={:?}: {}", ENV_RECLAIM_INTERVAL, raw, e),
            }
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_capacity > MAX_INITIAL_CAPACITY {
            return Err(ConfigError::ValidationError(format!(
                "initial_capacity {} exceeds maximum of {}",
                self.initial_capacity, MAX_INITIAL_CAPACITY
            )));
        }
        Ok(())
    }
}
