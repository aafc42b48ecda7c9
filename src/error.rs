//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent way to report the
//! failures the acquisition loop can run into, from configuration problems to
//! unreadable logs and instrument faults.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment` while merging the TOML file,
//!   defaults and environment overrides.
//! - **`Configuration`**: Semantic errors in values that parsed fine but make no
//!   sense (a zero poll interval, an empty instrument address, a malformed
//!   sweep settings file).
//! - **`Io`** / **`LogRead`**: File system failures. A missing temperature log is
//!   reported through `LogRead` so the path is part of the message.
//! - **`Instrument`**: Communication or parse faults on the lock-in amplifier.
//!   The poller turns these into a "no reading" sentinel; the oscillator write
//!   path reports them to the caller.
//! - **`NoReadingsAvailable`**: Correlation was requested before any instrument
//!   reading was collected. The loop skips the sample.
//! - **`FeatureNotEnabled`**: A transport or storage backend was selected that
//!   was not compiled in.
//!
//! By using `#[from]`, `DaqError` can be created from the underlying error
//! types directly, so `?` works across the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Every error the acquisition library can report.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Figment could not merge or extract the configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A configuration value is present but invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Generic I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The external temperature log could not be opened or read.
    #[error("Failed to read temperature log '{}': {source}", path.display())]
    LogRead {
        /// Path of the log that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Instrument communication or response parsing failed.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// Correlation was attempted against an empty reading buffer.
    #[error("No instrument readings available for correlation")]
    NoReadingsAvailable,

    /// Writing a CSV row failed.
    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A transport or backend was requested that this build does not include.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}
