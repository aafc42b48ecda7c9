//! Nearest-neighbour join between temperature samples and lock-in readings.
//!
//! The temperature logger and the lock-in run on independent clocks and
//! cadences, so each sample is paired with the reading captured closest to it
//! in time. Ties go to the reading seen first (the older one).

use crate::core::{CorrelatedRecord, InstrumentReading, TemperatureSample};
use crate::error::{AppResult, DaqError};
use tracing::debug;

/// Find the reading whose capture time is closest to the sample's timestamp.
///
/// Returns [`DaqError::NoReadingsAvailable`] when `readings` is empty.
pub fn nearest<'a, I>(sample: &TemperatureSample, readings: I) -> AppResult<&'a InstrumentReading>
where
    I: IntoIterator<Item = &'a InstrumentReading>,
{
    let mut best: Option<(&InstrumentReading, i64)> = None;
    for reading in readings {
        let distance = (reading.captured_at - sample.timestamp)
            .num_microseconds()
            .map_or(i64::MAX, i64::abs);
        // Strict comparison keeps the first of equally distant readings.
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((reading, distance));
        }
    }
    best.map(|(reading, _)| reading)
        .ok_or(DaqError::NoReadingsAvailable)
}

/// Pair a sample with its nearest reading.
pub fn correlate_one<'a, I>(sample: &TemperatureSample, readings: I) -> AppResult<CorrelatedRecord>
where
    I: IntoIterator<Item = &'a InstrumentReading>,
{
    let reading = nearest(sample, readings)?;
    Ok(CorrelatedRecord {
        timestamp: sample.timestamp,
        temperature: sample.temperature,
        values: reading.values,
    })
}

/// Correlate a batch of samples in order.
///
/// Samples that cannot be matched because no reading exists yet are skipped.
pub fn correlate<'a, I>(samples: &[TemperatureSample], readings: I) -> Vec<CorrelatedRecord>
where
    I: IntoIterator<Item = &'a InstrumentReading> + Clone,
{
    let mut records = Vec::with_capacity(samples.len());
    for sample in samples {
        match correlate_one(sample, readings.clone()) {
            Ok(record) => records.push(record),
            Err(e) => debug!(timestamp = %sample.timestamp, "skipping sample: {}", e),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LockInValues;
    use chrono::{TimeZone, Utc};

    fn reading(secs: i64, x: f64) -> InstrumentReading {
        InstrumentReading {
            captured_at: Utc.timestamp_opt(secs, 0).single().unwrap(),
            values: LockInValues { x, y: -x },
        }
    }

    fn sample(secs: i64) -> TemperatureSample {
        TemperatureSample {
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            temperature: 4.2,
        }
    }

    #[test]
    fn test_nearest_picks_closest() {
        let readings = vec![reading(0, 1.0), reading(10, 2.0)];
        assert_eq!(nearest(&sample(4), &readings).unwrap().values.x, 1.0);
        assert_eq!(nearest(&sample(6), &readings).unwrap().values.x, 2.0);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let readings = vec![reading(0, 1.0), reading(10, 2.0)];
        assert_eq!(nearest(&sample(5), &readings).unwrap().values.x, 1.0);
    }

    #[test]
    fn test_sample_outside_range() {
        let readings = vec![reading(100, 1.0), reading(110, 2.0)];
        assert_eq!(nearest(&sample(0), &readings).unwrap().values.x, 1.0);
        assert_eq!(nearest(&sample(500), &readings).unwrap().values.x, 2.0);
    }

    #[test]
    fn test_empty_buffer_is_error() {
        let readings: Vec<InstrumentReading> = Vec::new();
        assert!(matches!(
            nearest(&sample(0), &readings),
            Err(DaqError::NoReadingsAvailable)
        ));
    }

    #[test]
    fn test_correlate_batch_keeps_sample_fields() {
        let readings = vec![reading(0, 1.0), reading(10, 2.0)];
        let records = correlate(&[sample(1), sample(9)], &readings);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].values.x, 1.0);
        assert_eq!(records[1].values, LockInValues { x: 2.0, y: -2.0 });
        assert_eq!(records[1].timestamp, sample(9).timestamp);
        assert_eq!(records[1].temperature, 4.2);
    }

    #[test]
    fn test_correlate_without_readings_skips_all() {
        let readings: Vec<InstrumentReading> = Vec::new();
        assert!(correlate(&[sample(1)], &readings).is_empty());
    }
}
