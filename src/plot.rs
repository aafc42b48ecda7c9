//! Throttled live-plot snapshots.
//!
//! The acquisition loop calls [`PlotRefresher::on_batch`] after every
//! correlation batch. Every `every`-th call builds a [`PlotSnapshot`] from the
//! record history and hands it to a [`PlotRenderer`]. The throttle is a batch
//! counter, not a timer.

use crate::core::CorrelatedRecord;
use crate::history::RecordHistory;
use tracing::info;

/// Padding in kelvin above and below the temperature series.
pub const TEMPERATURE_PADDING: f64 = 1.0;

/// Data and axis limits for one redraw.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotSnapshot {
    /// Seconds since the oldest record in history.
    pub elapsed: Vec<f64>,
    /// Temperature series in kelvin.
    pub temperature: Vec<f64>,
    /// In-phase series in volts.
    pub vx: Vec<f64>,
    /// Out-of-phase series in volts.
    pub vy: Vec<f64>,
    /// x axis limits, `0` to `max elapsed + 1`.
    pub x_limits: (f64, f64),
    /// Temperature axis limits with one kelvin of padding.
    pub temperature_limits: (f64, f64),
    /// In-phase axis limits, the series minimum and maximum.
    pub vx_limits: (f64, f64),
    /// Out-of-phase axis limits, the series minimum and maximum.
    pub vy_limits: (f64, f64),
    /// Newest record.
    pub latest: CorrelatedRecord,
}

impl PlotSnapshot {
    /// Build a snapshot; `None` for an empty history.
    pub fn from_history(history: &RecordHistory) -> Option<Self> {
        let first = history.first()?.timestamp;
        let latest = *history.last()?;

        let len = history.len();
        let mut snapshot = Self {
            elapsed: Vec::with_capacity(len),
            temperature: Vec::with_capacity(len),
            vx: Vec::with_capacity(len),
            vy: Vec::with_capacity(len),
            x_limits: (0.0, 1.0),
            temperature_limits: (0.0, 0.0),
            vx_limits: (0.0, 0.0),
            vy_limits: (0.0, 0.0),
            latest,
        };

        let mut t_min = f64::INFINITY;
        let mut t_max = f64::NEG_INFINITY;
        let mut vx = (f64::INFINITY, f64::NEG_INFINITY);
        let mut vy = (f64::INFINITY, f64::NEG_INFINITY);
        for record in history {
            let secs = (record.timestamp - first).num_milliseconds() as f64 / 1000.0;
            snapshot.elapsed.push(secs);
            snapshot.temperature.push(record.temperature);
            snapshot.vx.push(record.values.x);
            snapshot.vy.push(record.values.y);
            t_min = t_min.min(record.temperature);
            t_max = t_max.max(record.temperature);
            vx = (vx.0.min(record.values.x), vx.1.max(record.values.x));
            vy = (vy.0.min(record.values.y), vy.1.max(record.values.y));
        }

        let x_max = snapshot.elapsed.iter().copied().fold(0.0, f64::max);
        snapshot.x_limits = (0.0, x_max + 1.0);
        snapshot.temperature_limits = (t_min - TEMPERATURE_PADDING, t_max + TEMPERATURE_PADDING);
        snapshot.vx_limits = vx;
        snapshot.vy_limits = vy;
        Some(snapshot)
    }
}

/// Something that can draw a snapshot.
pub trait PlotRenderer: Send {
    /// Draw one refresh.
    fn render(&mut self, snapshot: &PlotSnapshot);
}

/// Renderer that reports the latest point as a structured log event.
#[derive(Debug, Default)]
pub struct LogRenderer;

impl PlotRenderer for LogRenderer {
    fn render(&mut self, snapshot: &PlotSnapshot) {
        let latest = &snapshot.latest;
        info!(
            points = snapshot.elapsed.len(),
            temperature = latest.temperature,
            vx = latest.values.x,
            vy = latest.values.y,
            t_lo = snapshot.temperature_limits.0,
            t_hi = snapshot.temperature_limits.1,
            span_s = snapshot.x_limits.1,
            vx_lo = snapshot.vx_limits.0,
            vx_hi = snapshot.vx_limits.1,
            vy_lo = snapshot.vy_limits.0,
            vy_hi = snapshot.vy_limits.1,
            "plot refresh"
        );
    }
}

/// Counts correlation batches and renders every `every`-th one.
pub struct PlotRefresher {
    every: u32,
    batches: u32,
    renderer: Box<dyn PlotRenderer>,
}

impl PlotRefresher {
    /// Refresh every `every` batches. Zero is treated as one.
    pub fn new(every: u32, renderer: Box<dyn PlotRenderer>) -> Self {
        Self {
            every: every.max(1),
            batches: 0,
            renderer,
        }
    }

    /// Count one batch. Returns whether a refresh was rendered.
    pub fn on_batch(&mut self, history: &RecordHistory) -> bool {
        self.batches += 1;
        if self.batches < self.every {
            return false;
        }
        self.batches = 0;
        match PlotSnapshot::from_history(history) {
            Some(snapshot) => {
                self.renderer.render(&snapshot);
                true
            }
            None => false,
        }
    }
}
