//! Single-source readout files.
//!
//! [`ReadoutCsv`] is written by the `readout` command, which polls the lock-in
//! without a temperature log: one row per successful poll with elapsed time,
//! both outputs and the magnitude.
//!
//! [`TemperatureCsv`] is written by the `temperature` command, which tails the
//! temperature log without an instrument: one row per new sample.

use crate::core::{LockInValues, TemperatureSample};
use crate::error::AppResult;
use std::path::{Path, PathBuf};

/// Column header of the readout file.
pub const READOUT_HEADER: [&str; 4] = ["Time (s)", "X (V)", "Y (V)", "Magnitude (V)"];

/// Column header of the temperature-only file.
pub const TEMPERATURE_HEADER: [&str; 2] = ["Timestamp", "Temperature (K)"];

/// CSV file of raw lock-in polls.
#[derive(Debug, Clone)]
pub struct ReadoutCsv {
    path: PathBuf,
    rows: u64,
}

impl ReadoutCsv {
    /// Create or truncate `path` and write the header row.
    pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        #[cfg(feature = "storage_csv")]
        {
            let mut writer = super::csv_sink::csv_writer(std::fs::File::create(&path)?);
            writer.write_record(READOUT_HEADER)?;
            writer.flush()?;
            tracing::info!("Readout file initialized at '{}'.", path.display());
            Ok(Self { path, rows: 0 })
        }
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = path;
            Err(crate::error::DaqError::FeatureNotEnabled(
                "storage_csv".to_string(),
            ))
        }
    }

    /// Append one poll taken `elapsed_secs` after the readout started.
    pub fn append(&mut self, elapsed_secs: f64, values: LockInValues) -> AppResult<()> {
        #[cfg(feature = "storage_csv")]
        {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut writer = super::csv_sink::csv_writer(file);
            writer.write_record([
                elapsed_secs.to_string(),
                values.x.to_string(),
                values.y.to_string(),
                values.magnitude().to_string(),
            ])?;
            writer.flush()?;
            self.rows += 1;
            Ok(())
        }
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = (elapsed_secs, values);
            Err(crate::error::DaqError::FeatureNotEnabled(
                "storage_csv".to_string(),
            ))
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended since creation.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// CSV file of temperature samples copied from the log.
#[derive(Debug, Clone)]
pub struct TemperatureCsv {
    path: PathBuf,
    rows: u64,
}

impl TemperatureCsv {
    /// Create or truncate `path` and write the header row.
    pub fn create(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();
        #[cfg(feature = "storage_csv")]
        {
            let mut writer = super::csv_sink::csv_writer(std::fs::File::create(&path)?);
            writer.write_record(TEMPERATURE_HEADER)?;
            writer.flush()?;
            tracing::info!("Temperature file initialized at '{}'.", path.display());
            Ok(Self { path, rows: 0 })
        }
        #[cfg(not(feature = "storage_csv"))]
        {
            let _ = path;
            Err(crate::error::DaqError::FeatureNotEnabled(
                "storage_csv".to_string(),
            ))
        }
    }

    /// Append a batch of samples, one row each, in a single open.
    pub fn append(&mut self, samples: &[TemperatureSample]) -> AppResult<()> {
        if samples.is_empty() {
            return Ok(());
        }
        #[cfg(feature = "storage_csv")]
        {
            use crate::core::ROW_TIME_FORMAT;
            use chrono::Local;

            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut writer = super::csv_sink::csv_writer(file);
            for sample in samples {
                writer.write_record([
                    sample
                        .timestamp
                        .with_timezone(&Local)
                        .format(ROW_TIME_FORMAT)
                        .to_string(),
                    sample.temperature.to_string(),
                ])?;
            }
            writer.flush()?;
            self.rows += samples.len() as u64;
            Ok(())
        }
        #[cfg(not(feature = "storage_csv"))]
        {
            Err(crate::error::DaqError::FeatureNotEnabled(
                "storage_csv".to_string(),
            ))
        }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended since creation.
    pub fn rows(&self) -> u64 {
        self.rows
    }
}
