//! Incremental reader for the temperature controller's append-only log.
//!
//! The log starts with a free-form preamble, then a literal `[Data]` marker
//! line, then one comma-separated row per sample:
//!
//! ```text
//! [Header]
//! Instrument, Model 335
//! [Data]
//! 1717171717.2,4.2031
//! 1717171718.2,4.2029
//! ```
//!
//! Each call seeks to the stored [`LogCursor`], reads everything appended since,
//! and returns the samples together with the advanced cursor. Only complete
//! lines are consumed: a trailing fragment without `\n` stays unread until the
//! logger finishes writing it.

use crate::core::{LogCursor, TemperatureSample};
use crate::error::{AppResult, DaqError};
use chrono::{DateTime, TimeZone, Utc};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Marker line separating the preamble from the data rows.
pub const DATA_MARKER: &str = "[Data]";

/// Which parsed rows are accepted.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleFilter {
    /// Drop samples logged before this instant.
    pub since: Option<DateTime<Utc>>,
    /// Require exactly this many columns per row.
    pub expected_columns: Option<usize>,
}

/// Read all complete lines appended after `cursor`.
///
/// Returns the accepted samples and the cursor to pass to the next call. The
/// cursor advances past every complete line read, including rows that failed
/// to parse. A missing or unreadable file is an error.
pub fn read_new_samples(
    path: &Path,
    cursor: LogCursor,
    filter: &SampleFilter,
) -> AppResult<(Vec<TemperatureSample>, LogCursor)> {
    let log_err = |source| DaqError::LogRead {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(log_err)?;
    let len = file.metadata().map_err(log_err)?.len();
    if len < cursor.offset {
        warn!(
            path = %path.display(),
            len,
            offset = cursor.offset,
            "temperature log shrank below read position; waiting for it to grow"
        );
        return Ok((Vec::new(), cursor));
    }

    file.seek(SeekFrom::Start(cursor.offset)).map_err(log_err)?;
    let mut buf = Vec::with_capacity((len - cursor.offset) as usize);
    file.read_to_end(&mut buf).map_err(log_err)?;

    let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
        return Ok((Vec::new(), cursor));
    };
    let complete = &buf[..=last_newline];

    let mut next = LogCursor {
        offset: cursor.offset + complete.len() as u64,
        in_data: cursor.in_data,
    };
    let mut samples = Vec::new();

    for raw in complete[..last_newline].split(|b| *b == b'\n') {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');

        if !next.in_data {
            if line.contains(DATA_MARKER) {
                next.in_data = true;
            }
            continue;
        }

        match parse_line(line, filter.expected_columns) {
            Some(sample) if filter.since.map_or(true, |since| sample.timestamp >= since) => {
                samples.push(sample)
            }
            Some(_) => trace!(line, "sample predates session start"),
            None => trace!(line, "skipping unparsable log line"),
        }
    }

    Ok((samples, next))
}

/// Parse one data row: epoch seconds in column 0, temperature in column 1.
///
/// The timestamp is truncated to whole seconds. Returns `None` for rows with
/// fewer than two columns, a column count other than `expected_columns`, or
/// non-numeric values.
pub fn parse_line(line: &str, expected_columns: Option<usize>) -> Option<TemperatureSample> {
    let parts: Vec<&str> = line.trim().split(',').collect();
    if parts.len() < 2 {
        return None;
    }
    if expected_columns.is_some_and(|n| parts.len() != n) {
        return None;
    }

    let epoch: f64 = parts[0].trim().parse().ok()?;
    let temperature: f64 = parts[1].trim().parse().ok()?;
    if !epoch.is_finite() || !temperature.is_finite() {
        return None;
    }

    let timestamp = Utc.timestamp_opt(epoch.trunc() as i64, 0).single()?;
    Some(TemperatureSample {
        timestamp,
        temperature,
    })
}

/// Stateful wrapper holding the path, filter and cursor between polls.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
    filter: SampleFilter,
    cursor: LogCursor,
}

impl LogTail {
    /// Tail `path` from the beginning of the file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            filter: SampleFilter::default(),
            cursor: LogCursor::start(),
        }
    }

    /// Ignore samples logged before `since`.
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.filter.since = Some(since);
        self
    }

    /// Only accept rows with exactly `columns` fields.
    pub fn with_expected_columns(mut self, columns: Option<usize>) -> Self {
        self.filter.expected_columns = columns;
        self
    }

    /// Path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current read position.
    pub fn cursor(&self) -> LogCursor {
        self.cursor
    }

    /// Read samples appended since the previous poll.
    pub fn poll(&mut self) -> AppResult<Vec<TemperatureSample>> {
        let (samples, cursor) = read_new_samples(&self.path, self.cursor, &self.filter)?;
        debug_assert!(cursor.offset >= self.cursor.offset);
        self.cursor = cursor;
        Ok(samples)
    }
}
