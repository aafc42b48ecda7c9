//! Stepped DC-offset sweep controller.
//!
//! A run starts once the temperature sits steady at `temp_min` and stops once
//! it sits steady at `temp_max`. After every run the DC offset is stepped by
//! `dc_step` and the oscillator is parked at 1 mV until the next run.
//!
//! ```text
//!                 near min, not steady
//!        Idle ─────────────────────────► WaitingForSteadyAtMin
//!         ▲  ◄──────────────────────────        │
//!         │        left min window              │ steady, near min
//!         │                                     ▼ (ApplyOscillator, StartRun)
//!         │ steady, near max            Recording
//!         │ (StopRun, park,             │   ▲
//!         │  StepDcOffset)   near max,  │   │ left max window
//!         │                  not steady ▼   │
//!         └──────────────────── WaitingForSteadyAtMax
//! ```
//!
//! [`transition`] is a pure function; [`SweepController`] owns the state, the
//! run counter and the current DC offset and feeds it observations built from
//! the record history.

use crate::config::{SweepConfig, SweepSettings};
use crate::core::OscillatorParams;
use crate::history::RecordHistory;
use std::fmt;
use tracing::{debug, info};

/// Number of most recent temperatures fitted by [`detect_trend`].
pub const DEFAULT_TREND_WINDOW: usize = 60;

/// Amplitude and offset in volts the oscillator is parked at between runs.
pub const PARKED_VOLTAGE: f64 = 0.001;

/// Temperature trend over the fit window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    /// Fewer than two points.
    InsufficientData,
    /// Slope below the tolerance.
    Steady,
    /// Rising faster than the tolerance.
    Warming,
    /// Falling faster than the tolerance.
    Cooling,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trend::InsufficientData => "not enough data",
            Trend::Steady => "steady",
            Trend::Warming => "warming",
            Trend::Cooling => "cooling",
        };
        f.write_str(name)
    }
}

/// Classify the last [`DEFAULT_TREND_WINDOW`] temperatures.
pub fn detect_trend(temperatures: &[f64], tolerance: f64) -> Trend {
    detect_trend_over(temperatures, DEFAULT_TREND_WINDOW, tolerance)
}

/// Classify the last `window` temperatures by the slope of a least-squares
/// line, with the sample index as x.
pub fn detect_trend_over(temperatures: &[f64], window: usize, tolerance: f64) -> Trend {
    let start = temperatures.len().saturating_sub(window);
    match slope(&temperatures[start..]) {
        None => Trend::InsufficientData,
        Some(s) if s.abs() < tolerance => Trend::Steady,
        Some(s) if s > 0.0 => Trend::Warming,
        Some(_) => Trend::Cooling,
    }
}

/// Least-squares slope of `ys` against `0..n`.
fn slope(ys: &[f64]) -> Option<f64> {
    let n = ys.len();
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n_f;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    Some(sxy / sxx)
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepState {
    /// No run, waiting to reach `temp_min`.
    #[default]
    Idle,
    /// At `temp_min`, waiting for the temperature to settle.
    WaitingForSteadyAtMin,
    /// A run file is open.
    Recording,
    /// At `temp_max` with the run still open, waiting to settle.
    WaitingForSteadyAtMax,
}

impl SweepState {
    /// Whether records belong to the current run file.
    pub fn is_recording(self) -> bool {
        matches!(self, SweepState::Recording | SweepState::WaitingForSteadyAtMax)
    }
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SweepAction {
    /// Write the oscillator settings to the lock-in.
    ApplyOscillator(OscillatorParams),
    /// Open `Run_<run_number>.csv`.
    #[allow(missing_docs)]
    StartRun { run_number: u32, dc_offset: f64 },
    /// Close the current run file.
    StopRun,
    /// Use this DC offset for the next run.
    StepDcOffset(f64),
}

/// Input of one transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepObservation {
    /// Trend over the fit window.
    pub trend: Trend,
    /// Newest temperature in kelvin.
    pub temperature: f64,
    /// Number the next run will get.
    pub run_number: u32,
    /// DC offset the next run will use.
    pub dc_offset: f64,
}

/// Plateau parameters consulted by [`transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    /// Plateaus, oscillator settings and DC step.
    pub settings: SweepSettings,
    /// Distance in kelvin within which a plateau counts as reached.
    pub window: f64,
}

impl SweepPlan {
    fn near_min(&self, temperature: f64) -> bool {
        (temperature - self.settings.temp_min).abs() <= self.window
    }

    fn near_max(&self, temperature: f64) -> bool {
        (temperature - self.settings.temp_max).abs() <= self.window
    }
}

/// Advance the controller by one observation.
pub fn transition(
    state: SweepState,
    obs: &SweepObservation,
    plan: &SweepPlan,
) -> (SweepState, Vec<SweepAction>) {
    let steady = obs.trend == Trend::Steady;
    let near_min = plan.near_min(obs.temperature);
    let near_max = plan.near_max(obs.temperature);
    let s = &plan.settings;

    match state {
        SweepState::Idle | SweepState::WaitingForSteadyAtMin if steady && near_min => (
            SweepState::Recording,
            vec![
                SweepAction::ApplyOscillator(OscillatorParams {
                    dc_offset: obs.dc_offset,
                    ac_amplitude: s.ac_voltage,
                    frequency: s.frequency,
                }),
                SweepAction::StartRun {
                    run_number: obs.run_number,
                    dc_offset: obs.dc_offset,
                },
            ],
        ),
        SweepState::Idle if near_min => (SweepState::WaitingForSteadyAtMin, Vec::new()),
        SweepState::WaitingForSteadyAtMin if !near_min => (SweepState::Idle, Vec::new()),

        SweepState::Recording | SweepState::WaitingForSteadyAtMax if steady && near_max => (
            SweepState::Idle,
            vec![
                SweepAction::StopRun,
                SweepAction::ApplyOscillator(OscillatorParams {
                    dc_offset: PARKED_VOLTAGE,
                    ac_amplitude: PARKED_VOLTAGE,
                    frequency: s.frequency,
                }),
                SweepAction::StepDcOffset(obs.dc_offset + s.dc_step),
            ],
        ),
        SweepState::Recording if near_max => (SweepState::WaitingForSteadyAtMax, Vec::new()),
        SweepState::WaitingForSteadyAtMax if !near_max => (SweepState::Recording, Vec::new()),

        other => (other, Vec::new()),
    }
}

/// Stateful driver around [`transition`].
#[derive(Debug, Clone)]
pub struct SweepController {
    plan: SweepPlan,
    trend_window: usize,
    tolerance: f64,
    state: SweepState,
    run_number: u32,
    dc_offset: f64,
}

impl SweepController {
    /// Start idle with run number 1 at the configured DC offset.
    pub fn new(settings: SweepSettings, config: &SweepConfig) -> Self {
        let tolerance = settings.steady_tolerance();
        let dc_offset = settings.dc_offset;
        Self {
            plan: SweepPlan {
                settings,
                window: config.temperature_window,
            },
            trend_window: config.trend_window,
            tolerance,
            state: SweepState::Idle,
            run_number: 1,
            dc_offset,
        }
    }

    /// Current state.
    pub fn state(&self) -> SweepState {
        self.state
    }

    /// Number the next run will get.
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// DC offset the next run will use.
    pub fn dc_offset(&self) -> f64 {
        self.dc_offset
    }

    /// Whether a run file should receive records.
    pub fn is_recording(&self) -> bool {
        self.state.is_recording()
    }

    /// Evaluate the trend over the history and advance the state.
    ///
    /// Returns the actions the caller must execute. An empty history yields
    /// no actions.
    pub fn evaluate(&mut self, history: &RecordHistory) -> Vec<SweepAction> {
        let Some(latest) = history.last() else {
            return Vec::new();
        };
        let temperatures = history.recent_temperatures(self.trend_window);
        let trend = detect_trend_over(&temperatures, self.trend_window, self.tolerance);
        info!(%trend, temperature = latest.temperature, "temperature trend");

        let obs = SweepObservation {
            trend,
            temperature: latest.temperature,
            run_number: self.run_number,
            dc_offset: self.dc_offset,
        };
        let (next, actions) = transition(self.state, &obs, &self.plan);
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "sweep state change");
        }
        self.state = next;

        for action in &actions {
            match action {
                SweepAction::StartRun { run_number, .. } => self.run_number = run_number + 1,
                SweepAction::StepDcOffset(dc) => {
                    self.dc_offset = *dc;
                    info!("DC offset set to: {}", dc);
                }
                _ => {}
            }
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CorrelatedRecord, LockInValues};
    use chrono::{TimeZone, Utc};

    fn settings() -> SweepSettings {
        SweepSettings {
            temp_min: 10.0,
            temp_max: 20.0,
            ac_voltage: 0.5,
            dc_offset: 0.1,
            dc_step: 0.05,
            frequency: 808_000.0,
            warming_ramp_rate: 1.0,
        }
    }

    fn plan() -> SweepPlan {
        SweepPlan {
            settings: settings(),
            window: 0.01,
        }
    }

    fn obs(trend: Trend, temperature: f64) -> SweepObservation {
        SweepObservation {
            trend,
            temperature,
            run_number: 3,
            dc_offset: 0.2,
        }
    }

    #[test]
    fn test_trend_classification() {
        let tolerance = 1.0 / 60.0 * 0.2;
        let steady: Vec<f64> = (0..60).map(|i| 10.0 + if i % 2 == 0 { 0.001 } else { -0.001 }).collect();
        let warming: Vec<f64> = (0..60).map(|i| 10.0 + 0.05 * i as f64).collect();
        let cooling: Vec<f64> = (0..60).map(|i| 10.0 - 0.05 * i as f64).collect();

        assert_eq!(detect_trend(&steady, tolerance), Trend::Steady);
        assert_eq!(detect_trend(&warming, tolerance), Trend::Warming);
        assert_eq!(detect_trend(&cooling, tolerance), Trend::Cooling);
        assert_eq!(detect_trend(&[4.2], tolerance), Trend::InsufficientData);
        assert_eq!(detect_trend(&[], tolerance), Trend::InsufficientData);
    }

    #[test]
    fn test_trend_uses_last_sixty_points() {
        let mut temps: Vec<f64> = (0..100).map(|i| i as f64).collect();
        temps.extend(std::iter::repeat(100.0).take(60));
        assert_eq!(detect_trend(&temps, 0.001), Trend::Steady);
    }

    #[test]
    fn test_slope_of_line() {
        let ys: Vec<f64> = (0..10).map(|i| 3.0 + 0.5 * i as f64).collect();
        assert!((slope(&ys).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_start_run_at_steady_min() {
        let (state, actions) = transition(SweepState::Idle, &obs(Trend::Steady, 10.005), &plan());
        assert_eq!(state, SweepState::Recording);
        assert_eq!(
            actions,
            vec![
                SweepAction::ApplyOscillator(OscillatorParams {
                    dc_offset: 0.2,
                    ac_amplitude: 0.5,
                    frequency: 808_000.0,
                }),
                SweepAction::StartRun {
                    run_number: 3,
                    dc_offset: 0.2
                },
            ]
        );
    }

    #[test]
    fn test_wait_for_steady_at_min() {
        let p = plan();
        let (state, actions) = transition(SweepState::Idle, &obs(Trend::Cooling, 10.0), &p);
        assert_eq!(state, SweepState::WaitingForSteadyAtMin);
        assert!(actions.is_empty());

        let (state, _) = transition(state, &obs(Trend::Cooling, 9.5), &p);
        assert_eq!(state, SweepState::Idle);

        let (state, _) = transition(SweepState::WaitingForSteadyAtMin, &obs(Trend::Steady, 10.0), &p);
        assert_eq!(state, SweepState::Recording);
    }

    #[test]
    fn test_stop_run_at_steady_max() {
        let (state, actions) =
            transition(SweepState::Recording, &obs(Trend::Steady, 19.995), &plan());
        assert_eq!(state, SweepState::Idle);
        assert_eq!(actions[0], SweepAction::StopRun);
        assert_eq!(
            actions[1],
            SweepAction::ApplyOscillator(OscillatorParams {
                dc_offset: PARKED_VOLTAGE,
                ac_amplitude: PARKED_VOLTAGE,
                frequency: 808_000.0,
            })
        );
        match actions[2] {
            SweepAction::StepDcOffset(dc) => assert!((dc - 0.25).abs() < 1e-12),
            ref other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_wait_for_steady_at_max() {
        let p = plan();
        let (state, _) = transition(SweepState::Recording, &obs(Trend::Warming, 20.0), &p);
        assert_eq!(state, SweepState::WaitingForSteadyAtMax);
        let (state, _) = transition(state, &obs(Trend::Warming, 20.5), &p);
        assert_eq!(state, SweepState::Recording);
        let (state, actions) =
            transition(SweepState::WaitingForSteadyAtMax, &obs(Trend::Steady, 20.0), &p);
        assert_eq!(state, SweepState::Idle);
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn test_steady_away_from_plateaus_is_noop() {
        let p = plan();
        for state in [SweepState::Idle, SweepState::Recording] {
            let (next, actions) = transition(state, &obs(Trend::Steady, 15.0), &p);
            assert_eq!(next, state);
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn test_controller_counts_runs_and_steps_offset() {
        let config = SweepConfig {
            settings_file: None,
            values: Some(settings()),
            temperature_window: 0.01,
            trend_window: 60,
        };
        let mut controller = SweepController::new(settings(), &config);
        let mut history = RecordHistory::new(100);
        let push = |history: &mut RecordHistory, t: f64| {
            for i in 0..60 {
                history.push(CorrelatedRecord {
                    timestamp: Utc.timestamp_opt(1_700_000_000 + i, 0).single().unwrap(),
                    temperature: t,
                    values: LockInValues { x: 0.0, y: 0.0 },
                });
            }
        };

        push(&mut history, 10.0);
        let actions = controller.evaluate(&history);
        assert!(matches!(actions[1], SweepAction::StartRun { run_number: 1, .. }));
        assert!(controller.is_recording());
        assert_eq!(controller.run_number(), 2);

        push(&mut history, 20.0);
        controller.evaluate(&history);
        assert_eq!(controller.state(), SweepState::Idle);
        assert!((controller.dc_offset() - 0.15).abs() < 1e-12);
    }
}
