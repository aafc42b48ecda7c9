//! CSV session and run files with clean feature flag handling.
//!
//! File layout:
//!
//! ```text
//! -----------------------------------------------------------
//! May 03 2024 04:15PM
//! Entire Data from session is collected in file. No distinction between runs is made.
//! -----------------------------------------------------------
//! Timestamp,Temperature (K),Vx,Vy
//! 2024-05-03 16:15:07,4.2031,0.000012,-0.0000031
//! ```
//!
//! The file is truncated once on creation. Every append opens the file, writes
//! one row, flushes and closes it again, so each row is on disk as soon as
//! `append` returns.

use super::{RecordSink, BANNER_SEPARATOR, BANNER_TIME_FORMAT, RECORD_HEADER};
use crate::core::CorrelatedRecord;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

// ============================================================================
// CSV Writer
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::{File, OpenOptions};

    /// Append-per-row CSV file of correlated records.
    #[derive(Debug, Clone)]
    pub struct CsvSink {
        path: PathBuf,
        rows: u64,
    }

    impl CsvSink {
        /// Create or truncate `path` and write banner plus header.
        ///
        /// Missing parent directories are created.
        pub fn create(
            path: impl Into<PathBuf>,
            description: &str,
            started_at: DateTime<Local>,
        ) -> AppResult<Self> {
            let path = path.into();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }

            let file = File::create(&path)?;
            let mut writer = csv_writer(file);
            let started = started_at.format(BANNER_TIME_FORMAT).to_string();
            for line in [BANNER_SEPARATOR, started.as_str(), description, BANNER_SEPARATOR] {
                writer.write_record([line])?;
            }
            writer.write_record(RECORD_HEADER)?;
            writer.flush()?;

            tracing::info!("CSV file initialized at '{}'.", path.display());
            Ok(Self { path, rows: 0 })
        }

        /// Append one record as a row.
        pub fn append(&mut self, record: &CorrelatedRecord) -> AppResult<()> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            let mut writer = csv_writer(file);
            writer.write_record(record.to_row())?;
            writer.flush()?;
            self.rows += 1;
            Ok(())
        }

        /// Location of the file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Data rows appended since creation.
        pub fn rows(&self) -> u64 {
            self.rows
        }
    }

    pub(crate) fn csv_writer(file: File) -> csv::Writer<File> {
        // The banner rows have a single field, the data rows four.
        csv::WriterBuilder::new().flexible(true).from_writer(file)
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;
    use crate::error::DaqError;

    /// Placeholder used when the `storage_csv` feature is disabled.
    #[derive(Debug, Clone)]
    pub struct CsvSink {
        path: PathBuf,
    }

    impl CsvSink {
        /// Always fails: CSV storage is not compiled in.
        pub fn create(
            _path: impl Into<PathBuf>,
            _description: &str,
            _started_at: DateTime<Local>,
        ) -> AppResult<Self> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// Always fails: CSV storage is not compiled in.
        pub fn append(&mut self, _record: &CorrelatedRecord) -> AppResult<()> {
            Err(DaqError::FeatureNotEnabled("storage_csv".to_string()))
        }

        /// Location of the file.
        pub fn path(&self) -> &Path {
            &self.path
        }

        /// Data rows appended since creation.
        pub fn rows(&self) -> u64 {
            0
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvSink;
#[cfg(feature = "storage_csv")]
pub(crate) use csv_enabled::csv_writer;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvSink;

#[async_trait]
impl RecordSink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&mut self, records: &[CorrelatedRecord]) -> AppResult<()> {
        for record in records {
            self.append(record)?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "storage_csv"))]
mod tests {
    use super::*;
    use crate::core::LockInValues;
    use crate::storage::SESSION_DESCRIPTION;
    use chrono::{TimeZone, Utc};

    fn record(secs: i64) -> CorrelatedRecord {
        CorrelatedRecord {
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            temperature: 4.5,
            values: LockInValues { x: 1e-5, y: -2e-6 },
        }
    }

    #[test]
    fn test_banner_and_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Full_Data.csv");
        let started = Local.with_ymd_and_hms(2024, 5, 3, 16, 15, 0).unwrap();
        CsvSink::create(&path, SESSION_DESCRIPTION, started).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], BANNER_SEPARATOR);
        assert_eq!(lines[1], "May 03 2024 04:15PM");
        assert_eq!(lines[2], SESSION_DESCRIPTION);
        assert_eq!(lines[3], BANNER_SEPARATOR);
        assert_eq!(lines[4], "Timestamp,Temperature (K),Vx,Vy");
    }

    #[tokio::test]
    async fn test_n_records_give_n_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("Run_1.csv");
        let mut sink = CsvSink::create(&path, "Run: 1. DC_offset: 0V", Local::now()).unwrap();

        let records: Vec<_> = (0..7).map(|i| record(1_700_000_000 + i)).collect();
        sink.write(&records[..3]).await.unwrap();
        sink.write(&records[3..]).await.unwrap();
        assert_eq!(sink.rows(), 7);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 4 + 1 + 7);
        let last = text.lines().last().unwrap();
        assert!(last.ends_with(",4.5,0.00001,-0.000002"));
    }

    #[test]
    fn test_create_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Full_Data.csv");
        std::fs::write(&path, "old\nold\nold\nold\nold\nold\nold\n").unwrap();
        CsvSink::create(&path, SESSION_DESCRIPTION, Local::now()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 5);
    }
}
