//! Hierarchical configuration loader.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid heartbeat_interval_secs: {0}. Must be positive")]
    InvalidHeartbeatInterval(u64),

    #[error("Invalid recovery_interval_secs: {0}. Must be positive")]
    InvalidRecoveryInterval(u64),

    #[error(
        "stale_threshold_secs ({0}) must exceed heartbeat_interval_secs ({1}); \
         otherwise healthy executions get claimed"
    )]
    StaleThresholdTooLow(u64, u64),

    #[error("Invalid default_join_timeout_ms: {0}. Must be positive")]
    InvalidJoinTimeout(u64),
}

/// Configuration loader with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. .hensu/config.yaml (project config)
    /// 3. .hensu/local.yaml (local overrides, optional)
    /// 4. Environment variables (HENSU_* prefix)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".hensu/config.yaml"))
            .merge(Yaml::file(".hensu/local.yaml"))
            .merge(Env::prefixed("HENSU_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        if config.scheduler.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidHeartbeatInterval(
                config.scheduler.heartbeat_interval_secs,
            ));
        }
        if config.scheduler.recovery_interval_secs == 0 {
            return Err(ConfigError::InvalidRecoveryInterval(
                config.scheduler.recovery_interval_secs,
            ));
        }
        if config.scheduler.stale_threshold_secs <= config.scheduler.heartbeat_interval_secs {
            return Err(ConfigError::StaleThresholdTooLow(
                config.scheduler.stale_threshold_secs,
                config.scheduler.heartbeat_interval_secs,
            ));
        }

        if config.engine.default_join_timeout_ms == 0 {
            return Err(ConfigError::InvalidJoinTimeout(
                config.engine.default_join_timeout_ms,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}
