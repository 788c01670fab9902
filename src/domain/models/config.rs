//! Engine configuration model.
//!
//! Loaded by `infrastructure::config::ConfigLoader` through figment; every
//! field has a programmatic default so a bare deployment works with no file.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Override for this process's lease identity. Generated at startup
    /// when absent.
    pub server_node_id: Option<Uuid>,
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".hensu/hensu.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Heartbeat and recovery scheduling. Disabled entirely in in-memory mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub heartbeat_interval_secs: u64,
    pub recovery_interval_secs: u64,
    /// Age after which a heartbeat is considered lost.
    pub stale_threshold_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            heartbeat_interval_secs: 30,
            recovery_interval_secs: 60,
            stale_threshold_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cap on rubric-driven auto-backtracks per node.
    pub max_backtracks: u32,
    /// Default for join nodes that omit `timeoutMs`.
    pub default_join_timeout_ms: u64,
    /// Keyword sets for the heuristic branch-vote classifier.
    pub approve_keywords: Vec<String>,
    pub reject_keywords: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_backtracks: 3,
            default_join_timeout_ms: 30_000,
            approve_keywords: vec![
                "approve".to_string(),
                "approved".to_string(),
                "lgtm".to_string(),
            ],
            reject_keywords: vec![
                "reject".to_string(),
                "rejected".to_string(),
                "deny".to_string(),
                "denied".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of: trace, debug, info, warn, error.
    pub level: String,
    /// One of: json, pretty.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
