//! Output sinks for correlated records.
//!
//! The acquisition loop hands every batch of correlated records to each
//! configured [`RecordSink`]. The CSV sink is the only durable state of a
//! session; further sinks (metrics, remote plotting) plug in through the same
//! trait.

pub mod csv_sink;
pub mod readout;

pub use csv_sink::CsvSink;
pub use readout::{ReadoutCsv, TemperatureCsv};

use crate::core::CorrelatedRecord;
use crate::error::AppResult;
use async_trait::async_trait;

/// Banner separator line written above and below the session description.
pub const BANNER_SEPARATOR: &str =
    "-----------------------------------------------------------";

/// Start-time format of the banner, e.g. `May 03 2024 04:15PM`.
pub const BANNER_TIME_FORMAT: &str = "%B %d %Y %I:%M%p";

/// Column header of session and run files.
pub const RECORD_HEADER: [&str; 4] = ["Timestamp", "Temperature (K)", "Vx", "Vy"];

/// Description written into the session file banner.
pub const SESSION_DESCRIPTION: &str =
    "Entire Data from session is collected in file. No distinction between runs is made.";

/// Description written into a sweep run file banner.
pub fn run_description(run_number: u32, dc_offset: f64) -> String {
    format!("Run: {}. DC_offset: {}V", run_number, dc_offset)
}

/// Destination for correlated records.
#[async_trait]
pub trait RecordSink: Send {
    /// Short name used in log messages.
    fn name(&self) -> &str;

    /// Persist a batch of records, in order.
    async fn write(&mut self, records: &[CorrelatedRecord]) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_description() {
        assert_eq!(run_description(3, 0.25), "Run: 3. DC_offset: 0.25V");
    }
}
