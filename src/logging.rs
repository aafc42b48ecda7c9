//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins when set; otherwise the level comes from
//! `application.log_level`. Call [`init`] once, at the top of `main`.

use crate::config::{ApplicationConfig, LogFormat};
use crate::error::{AppResult, DaqError};
use tracing_subscriber::EnvFilter;

/// Build the filter from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> AppResult<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(default_level).map_err(|e| {
            DaqError::Configuration(format!("invalid log level '{}': {}", default_level, e))
        }),
    }
}

/// Install the global subscriber.
pub fn init(config: &ApplicationConfig) -> AppResult<()> {
    let filter = env_filter(&config.log_level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.log_format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| DaqError::Configuration(format!("failed to install logger: {}", e)))
}
