//! The correlated poll-and-log loop.
//!
//! One iteration:
//!
//! 1. Poll the lock-in; a successful reading goes into the reading buffer.
//! 2. Read every temperature sample appended to the log since the last pass.
//! 3. Pair each sample with the nearest reading.
//! 4. Write the records to every sink, and to the run file while a sweep run
//!    is recording.
//! 5. Push the records into the history, then tick the plot and sweep
//!    counters.
//!
//! The loop then sleeps for `poll_interval` and checks the stop flag. A failed
//! poll only means no new reading this time; an unreadable log or a failing
//! sink ends the loop with an error.

use crate::config::Settings;
use crate::correlate::correlate;
use crate::error::AppResult;
use crate::history::{ReadingBuffer, RecordHistory};
use crate::instrument::LockIn;
use crate::log_tail::LogTail;
use crate::plot::{LogRenderer, PlotRefresher, PlotRenderer};
use crate::storage::{run_description, CsvSink, ReadoutCsv, RecordSink, TemperatureCsv};
use crate::sweep::{SweepAction, SweepController, SweepState};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// What one iteration did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Whether the lock-in produced a reading.
    pub polled: bool,
    /// New temperature samples read from the log.
    pub samples: usize,
    /// Records written and pushed into the history.
    pub records: usize,
}

struct SweepRun {
    controller: SweepController,
    run_file: Option<CsvSink>,
    batches: u32,
}

/// Correlated poll-and-log loop state.
pub struct Acquisition {
    settings: Arc<Settings>,
    lockin: LockIn,
    tail: LogTail,
    sinks: Vec<Box<dyn RecordSink>>,
    readings: ReadingBuffer,
    history: RecordHistory,
    plot: PlotRefresher,
    sweep: Option<SweepRun>,
    stop: Arc<AtomicBool>,
}

impl Acquisition {
    /// Build a loop with empty buffers, no sinks and the log renderer.
    pub fn new(settings: Arc<Settings>, lockin: LockIn, tail: LogTail) -> Self {
        let acq = &settings.acquisition;
        let readings = ReadingBuffer::new(acq.reading_buffer_cap);
        let history = RecordHistory::new(acq.history_cap);
        let plot = PlotRefresher::new(acq.plot_every, Box::new(LogRenderer));
        Self {
            settings,
            lockin,
            tail,
            sinks: Vec::new(),
            readings,
            history,
            plot,
            sweep: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add a record sink.
    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Replace the plot renderer.
    pub fn with_renderer(mut self, renderer: Box<dyn PlotRenderer>) -> Self {
        self.plot = PlotRefresher::new(self.settings.acquisition.plot_every, renderer);
        self
    }

    /// Drive a sweep controller from this loop.
    pub fn with_sweep(mut self, controller: SweepController) -> Self {
        self.sweep = Some(SweepRun {
            controller,
            run_file: None,
            batches: 0,
        });
        self
    }

    /// Flag that ends [`Acquisition::run`] once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Correlated records kept for plotting.
    pub fn history(&self) -> &RecordHistory {
        &self.history
    }

    /// Instrument readings available for correlation.
    pub fn readings(&self) -> &ReadingBuffer {
        &self.readings
    }

    /// Current sweep state, if a sweep is attached.
    pub fn sweep_state(&self) -> Option<SweepState> {
        self.sweep.as_ref().map(|s| s.controller.state())
    }

    /// Run until the stop flag is set or a fatal error occurs.
    pub async fn run(&mut self) -> AppResult<()> {
        let interval = self.settings.acquisition.poll_interval();
        info!(
            log = %self.tail.path().display(),
            interval_ms = interval.as_millis() as u64,
            sinks = self.sinks.len(),
            sweep = self.sweep.is_some(),
            "acquisition started"
        );

        while !self.stop.load(Ordering::Relaxed) {
            self.run_iteration().await?;
            tokio::time::sleep(interval).await;
        }

        info!(
            records = self.history.len(),
            cursor = self.tail.cursor().offset,
            "acquisition stopped"
        );
        Ok(())
    }

    /// Execute one pass of the loop without sleeping.
    pub async fn run_iteration(&mut self) -> AppResult<IterationReport> {
        let mut report = IterationReport::default();

        if let Some(reading) = self.lockin.poll().await {
            self.readings.push(reading);
            report.polled = true;
        }

        let samples = self.tail.poll()?;
        report.samples = samples.len();
        if samples.is_empty() {
            return Ok(report);
        }

        let records = correlate(&samples, &self.readings);
        report.records = records.len();
        if records.is_empty() {
            return Ok(report);
        }

        for sink in &mut self.sinks {
            sink.write(&records).await?;
        }
        if let Some(run_file) = self.sweep.as_mut().and_then(|s| s.run_file.as_mut()) {
            run_file.write(&records).await?;
        }
        for record in &records {
            self.history.push(*record);
        }
        debug!(records = records.len(), "batch stored");

        self.plot.on_batch(&self.history);
        self.tick_sweep().await?;
        Ok(report)
    }

    async fn tick_sweep(&mut self) -> AppResult<()> {
        let trend_every = self.settings.acquisition.trend_every;
        let actions = match self.sweep.as_mut() {
            Some(sweep) => {
                sweep.batches += 1;
                if sweep.batches < trend_every {
                    return Ok(());
                }
                sweep.batches = 0;
                sweep.controller.evaluate(&self.history)
            }
            None => return Ok(()),
        };

        for action in actions {
            self.execute(action).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, action: SweepAction) -> AppResult<()> {
        match action {
            SweepAction::ApplyOscillator(params) => {
                if let Err(e) = self.lockin.set_oscillator(params).await {
                    error!("Failed to set oscillator parameters: {}", e);
                }
            }
            SweepAction::StartRun {
                run_number,
                dc_offset,
            } => {
                let path = self.run_file_path(run_number);
                let sink = CsvSink::create(
                    &path,
                    &run_description(run_number, dc_offset),
                    Local::now(),
                )?;
                info!(run_number, dc_offset, file = %path.display(), "run started");
                if let Some(sweep) = self.sweep.as_mut() {
                    sweep.run_file = Some(sink);
                }
            }
            SweepAction::StopRun => {
                if let Some(file) = self.sweep.as_mut().and_then(|s| s.run_file.take()) {
                    info!(rows = file.rows(), file = %file.path().display(), "run finished");
                }
            }
            SweepAction::StepDcOffset(dc_offset) => {
                debug!(dc_offset, "next run DC offset");
            }
        }
        Ok(())
    }

    fn run_file_path(&self, run_number: u32) -> PathBuf {
        self.settings
            .paths
            .run_dir
            .join(format!("Run_{}.csv", run_number))
    }
}

/// Instrument-only readout: polls the lock-in and logs X, Y and magnitude.
pub struct Readout {
    lockin: LockIn,
    file: ReadoutCsv,
    started: Instant,
    interval: std::time::Duration,
    stop: Arc<AtomicBool>,
}

impl Readout {
    /// Create the readout file and start the clock.
    pub fn new(settings: &Settings, lockin: LockIn, output: impl Into<PathBuf>) -> AppResult<Self> {
        Ok(Self {
            lockin,
            file: ReadoutCsv::create(output)?,
            started: Instant::now(),
            interval: settings.acquisition.poll_interval(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that ends [`Readout::run`] once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.file.rows()
    }

    /// Poll once; returns whether a row was written.
    pub async fn run_iteration(&mut self) -> AppResult<bool> {
        let Some(reading) = self.lockin.poll().await else {
            return Ok(false);
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        self.file.append(elapsed, reading.values)?;
        info!(
            t = elapsed,
            x = reading.values.x,
            y = reading.values.y,
            magnitude = reading.values.magnitude(),
            "lock-in reading"
        );
        Ok(true)
    }

    /// Run until the stop flag is set.
    pub async fn run(&mut self) -> AppResult<()> {
        info!(file = %self.file.path().display(), "readout started");
        while !self.stop.load(Ordering::Relaxed) {
            self.run_iteration().await?;
            tokio::time::sleep(self.interval).await;
        }
        info!(rows = self.file.rows(), "readout stopped");
        Ok(())
    }
}

/// Temperature-only readout: copies new log samples into a two-column file.
pub struct TemperatureReadout {
    tail: LogTail,
    file: TemperatureCsv,
    interval: std::time::Duration,
    stop: Arc<AtomicBool>,
}

impl TemperatureReadout {
    /// Create the temperature file. No instrument is involved.
    pub fn new(settings: &Settings, tail: LogTail, output: impl Into<PathBuf>) -> AppResult<Self> {
        Ok(Self {
            tail,
            file: TemperatureCsv::create(output)?,
            interval: settings.acquisition.poll_interval(),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that ends [`TemperatureReadout::run`] once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.file.rows()
    }

    /// Read the log once; returns the number of rows written.
    pub async fn run_iteration(&mut self) -> AppResult<usize> {
        let samples = self.tail.poll()?;
        self.file.append(&samples)?;
        if let Some(latest) = samples.last() {
            info!(
                timestamp = %latest.timestamp.with_timezone(&Local),
                temperature = latest.temperature,
                "temperature"
            );
        }
        Ok(samples.len())
    }

    /// Run until the stop flag is set or the log becomes unreadable.
    pub async fn run(&mut self) -> AppResult<()> {
        info!(
            log = %self.tail.path().display(),
            file = %self.file.path().display(),
            "temperature readout started"
        );
        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.run_iteration().await {
                error!(error = %e, "temperature readout stopped");
                return Err(e);
            }
            tokio::time::sleep(self.interval).await;
        }
        info!(rows = self.file.rows(), "temperature readout stopped");
        Ok(())
    }
}
