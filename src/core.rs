//! Core data types shared by every stage of the acquisition pipeline.
//!
//! # Data Flow
//!
//! ```text
//! temperature log --[TemperatureSample]--+
//!                                        +--> correlate --[CorrelatedRecord]--> sinks
//! lock-in poll --[InstrumentReading]-----+
//! ```
//!
//! All timestamps are UTC. They are only converted to local time when written
//! to a human-facing file.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp format used for rows in the output CSV files.
pub const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Position in the external append-only temperature log.
///
/// The offset only ever moves forward. `in_data` records whether the
/// `[Data]` marker has already been consumed, so a resumed read knows that
/// every following line is a data row.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogCursor {
    /// Byte offset of the first unread byte.
    pub offset: u64,
    /// Whether the `[Data]` marker line has been passed.
    pub in_data: bool,
}

impl LogCursor {
    /// A cursor at the start of the file, before the data marker.
    pub fn start() -> Self {
        Self::default()
    }
}

/// One temperature row parsed from the external log.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSample {
    /// Logger timestamp, truncated to whole seconds.
    pub timestamp: DateTime<Utc>,
    /// Temperature in kelvin.
    pub temperature: f64,
}

/// The two output channels of the lock-in amplifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockInValues {
    /// In-phase component (`OUTP? 0`), volts.
    pub x: f64,
    /// Out-of-phase component (`OUTP? 1`), volts.
    pub y: f64,
}

impl LockInValues {
    /// Signal magnitude `sqrt(x² + y²)`.
    pub fn magnitude(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// A single successful poll of the lock-in amplifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstrumentReading {
    /// Wall-clock time at which both queries completed.
    pub captured_at: DateTime<Utc>,
    /// Values read from the instrument.
    pub values: LockInValues,
}

/// A temperature sample joined with the nearest instrument reading.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedRecord {
    /// Timestamp taken from the temperature sample.
    pub timestamp: DateTime<Utc>,
    /// Temperature in kelvin.
    pub temperature: f64,
    /// Values of the nearest instrument reading.
    pub values: LockInValues,
}

impl CorrelatedRecord {
    /// Render the record as the four CSV fields
    /// `Timestamp, Temperature (K), Vx, Vy`.
    pub fn to_row(&self) -> [String; 4] {
        [
            self.timestamp
                .with_timezone(&Local)
                .format(ROW_TIME_FORMAT)
                .to_string(),
            self.temperature.to_string(),
            self.values.x.to_string(),
            self.values.y.to_string(),
        ]
    }
}

/// Oscillator settings written to the lock-in amplifier.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OscillatorParams {
    /// DC offset in volts (`SOFF`).
    pub dc_offset: f64,
    /// AC amplitude in volts (`SLVL`).
    pub ac_amplitude: f64,
    /// Reference frequency in hertz (`FREQ`).
    pub frequency: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_magnitude() {
        let v = LockInValues { x: 3.0, y: 4.0 };
        assert!((v.magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_record_row_fields() {
        let record = CorrelatedRecord {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
            temperature: 4.25,
            values: LockInValues { x: 0.5, y: -0.125 },
        };
        let row = record.to_row();
        assert_eq!(row[1], "4.25");
        assert_eq!(row[2], "0.5");
        assert_eq!(row[3], "-0.125");
        assert_eq!(row[0].len(), "2023-11-14 22:13:20".len());
    }

    #[test]
    fn test_cursor_starts_before_marker() {
        let cursor = LogCursor::start();
        assert_eq!(cursor.offset, 0);
        assert!(!cursor.in_data);
    }
}
