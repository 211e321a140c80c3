//! Configuration management
//!
//! Defaults mirror the wire protocol the key server speaks: 50 keys per
//! transfer page, a fetch batch larger than 50 signalling more keys, and
//! 10 catch-up rounds when finishing a rotation. Values can be loaded from
//! a TOML file or overridden from `GROUPKEY_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_group::page_codec::PageBoundary;

/// Default number of keys per transfer page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default fetch batch size above which another fetch is issued
pub const DEFAULT_FETCH_BATCH_THRESHOLD: usize = 50;

/// Default number of rounds in the rotation catch-up loop
pub const DEFAULT_ROTATION_ROUNDS: u32 = 10;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key transfer and fetch pagination
    pub keys: KeyTransferConfig,

    /// Rotation catch-up loop
    pub rotation: RotationConfig,

    /// Rank thresholds for privileged operations
    pub ranks: RankPolicy,

    /// Persistence of group data
    pub store: StoreConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Key transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyTransferConfig {
    /// Keys per upload page
    pub page_size: usize,

    /// A fetched batch longer than this means the server has more keys
    pub fetch_batch_threshold: usize,

    /// Upper bound rule used when slicing pages
    pub page_boundary: PageBoundary,
}

/// Rotation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    /// Maximum resolve/fetch rounds per finish call
    pub max_rounds: u32,

    /// Deadline for `Group::finish_rotation_with_timeout`
    #[serde(with = "humantime_serde")]
    pub finish_timeout: Duration,
}

/// Highest rank (numerically) allowed to perform each operation.
///
/// Lower rank means more privilege; rank 0 is the group creator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankPolicy {
    /// Inviting a new member
    pub invite: u32,

    /// Listing, accepting and rejecting join requests
    pub join_requests: u32,

    /// Preparing and publishing a key rotation
    pub rotation: u32,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix of the key group data is saved under
    pub namespace: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for KeyTransferConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_batch_threshold: DEFAULT_FETCH_BATCH_THRESHOLD,
            page_boundary: PageBoundary::default(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { max_rounds: DEFAULT_ROTATION_ROUNDS, finish_timeout: Duration::from_secs(30) }
    }
}

impl Default for RankPolicy {
    fn default() -> Self {
        Self { invite: 2, join_requests: 2, rotation: 1 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { namespace: "group_data".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json_format: false, with_timestamp: true, with_target: true }
    }
}

fn env_override<T>(name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(name) {
        *slot = raw
            .parse()
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", name, e)))?;
    }
    Ok(())
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: GROUPKEY_<SECTION>_<KEY>
    /// Example: GROUPKEY_ROTATION_MAX_ROUNDS=20
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GROUPKEY_*` overrides on top of the current values
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        env_override("GROUPKEY_KEYS_PAGE_SIZE", &mut self.keys.page_size)?;
        env_override("GROUPKEY_KEYS_FETCH_BATCH_THRESHOLD", &mut self.keys.fetch_batch_threshold)?;
        env_override("GROUPKEY_KEYS_PAGE_BOUNDARY", &mut self.keys.page_boundary)?;

        env_override("GROUPKEY_ROTATION_MAX_ROUNDS", &mut self.rotation.max_rounds)?;
        if let Ok(raw) = env::var("GROUPKEY_ROTATION_FINISH_TIMEOUT") {
            self.rotation.finish_timeout = humantime_serde::re::humantime::parse_duration(&raw)
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid finish timeout: {}", e)))?;
        }

        env_override("GROUPKEY_RANKS_INVITE", &mut self.ranks.invite)?;
        env_override("GROUPKEY_RANKS_JOIN_REQUESTS", &mut self.ranks.join_requests)?;
        env_override("GROUPKEY_RANKS_ROTATION", &mut self.ranks.rotation)?;

        if let Ok(namespace) = env::var("GROUPKEY_STORE_NAMESPACE") {
            self.store.namespace = namespace;
        }

        if let Ok(level) = env::var("GROUPKEY_LOG_LEVEL") {
            self.logging.level = level;
        }
        env_override("GROUPKEY_LOG_JSON", &mut self.logging.json_format)?;

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "page_size must be greater than 0".to_string(),
            ));
        }

        if self.keys.fetch_batch_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "fetch_batch_threshold must be greater than 0".to_string(),
            ));
        }

        if self.rotation.max_rounds == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_rounds must be greater than 0".to_string(),
            ));
        }

        if self.rotation.finish_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "finish_timeout must be greater than 0".to_string(),
            ));
        }

        if self.store.namespace.is_empty() {
            return Err(ConfigError::ValidationFailed("store namespace is empty".to_string()));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
