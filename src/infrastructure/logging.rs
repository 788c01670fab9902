//! Tracing bootstrap.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::domain::models::config::LoggingConfig;

/// Initialise the global tracing subscriber from the logging config. The
/// `RUST_LOG` environment variable overrides the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(true)
                .try_init()
                .map_err(|e| anyhow!("Failed to init tracing: {}", e))?;
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .try_init()
                .map_err(|e| anyhow!("Failed to init tracing: {}", e))?;
        }
        other => return Err(anyhow!("Unknown log format: {}", other)),
    }
    Ok(())
}
