//! Fixed-capacity FIFO buffers for readings and correlated records.
//!
//! Both buffers exist to bound memory and plot-refresh cost over a long
//! session; once the cap is reached the oldest entry is evicted on every push.

use crate::core::{CorrelatedRecord, InstrumentReading};
use std::collections::VecDeque;

/// Instrument readings available to the correlator.
pub type ReadingBuffer = BoundedHistory<InstrumentReading>;

/// Correlated records kept for plotting and trend detection.
pub type RecordHistory = BoundedHistory<CorrelatedRecord>;

/// Ordered buffer holding at most `cap` items, oldest first.
#[derive(Debug, Clone)]
pub struct BoundedHistory<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T> BoundedHistory<T> {
    /// Create an empty buffer. A `cap` of zero is treated as one.
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            items: VecDeque::with_capacity(cap),
            cap,
        }
    }

    /// Append an item, evicting the oldest one if the buffer is full.
    /// Returns the evicted item.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.cap {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Configured maximum length.
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Number of items currently held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the buffer holds nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Oldest item.
    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    /// Newest item.
    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.items.iter()
    }
}

impl<'a, T> IntoIterator for &'a BoundedHistory<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl RecordHistory {
    /// Temperatures of the newest `n` records, oldest first.
    pub fn recent_temperatures(&self, n: usize) -> Vec<f64> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).map(|r| r.temperature).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LockInValues;
    use chrono::{TimeZone, Utc};

    fn record(secs: i64, temperature: f64) -> CorrelatedRecord {
        CorrelatedRecord {
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            temperature,
            values: LockInValues { x: 0.0, y: 0.0 },
        }
    }

    #[test]
    fn test_never_exceeds_cap() {
        let mut history = BoundedHistory::new(3);
        for i in 0..10 {
            history.push(i);
            assert!(history.len() <= 3);
        }
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut history = BoundedHistory::new(2);
        assert_eq!(history.push("a"), None);
        assert_eq!(history.push("b"), None);
        assert_eq!(history.push("c"), Some("a"));
        assert_eq!(history.first(), Some(&"b"));
        assert_eq!(history.last(), Some(&"c"));
    }

    #[test]
    fn test_zero_cap_holds_one() {
        let mut history = BoundedHistory::new(0);
        history.push(1);
        history.push(2);
        assert_eq!(history.cap(), 1);
        assert_eq!(history.last(), Some(&2));
    }

    #[test]
    fn test_recent_temperatures() {
        let mut history = RecordHistory::new(10);
        for i in 0..5 {
            history.push(record(i, i as f64));
        }
        assert_eq!(history.recent_temperatures(3), vec![2.0, 3.0, 4.0]);
        assert_eq!(history.recent_temperatures(60).len(), 5);
    }
}
