//! # Chi-2 DAQ
//!
//! Command-line entry point for the Chi-2 lock-in / temperature acquisition.
//!
//! ## Usage
//!
//! ```bash
//! # Correlate the temperature log with lock-in polls into Full_Data.csv
//! chi2_daq run --config chi2.toml
//!
//! # Same, stepping the DC offset between temperature plateaus
//! chi2_daq run --config chi2.toml --sweep
//!
//! # Lock-in only, no temperature log
//! chi2_daq readout --output lockin_data.csv
//!
//! # Temperature only, no instrument
//! chi2_daq temperature --output Temperature_log.csv
//!
//! # One-shot oscillator write
//! chi2_daq set-oscillator --dc-offset 0.5 --ac-amplitude 1 --frequency 808000
//!
//! # Print the effective configuration
//! chi2_daq check-config --config chi2.toml
//! ```

use anyhow::{Context, Result};
use chi2_daq::acquisition::{Acquisition, Readout, TemperatureReadout};
use chi2_daq::config::{Settings, Transport};
use chi2_daq::core::OscillatorParams;
use chi2_daq::instrument::{connector_from_config, LockIn};
use chi2_daq::log_tail::LogTail;
use chi2_daq::storage::{CsvSink, SESSION_DESCRIPTION};
use chi2_daq::sweep::SweepController;
use chrono::{Local, Timelike, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Chi-2 lock-in amplifier and temperature log acquisition
#[derive(Parser)]
#[command(name = "chi2_daq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level, overrides `application.log_level` (RUST_LOG still wins)
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate lock-in polls with the temperature log
    Run {
        /// Use the synthetic instrument instead of the configured transport
        #[arg(long)]
        mock: bool,

        /// Drive the DC-offset sweep controller
        #[arg(long)]
        sweep: bool,
    },

    /// Poll the lock-in only and write X, Y and magnitude to CSV
    Readout {
        /// Use the synthetic instrument instead of the configured transport
        #[arg(long)]
        mock: bool,

        /// Output file, defaults to `paths.readout_file`
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Copy new temperature log samples to a two-column CSV, no instrument
    Temperature {
        /// Output file, defaults to `paths.temperature_file`
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Write the oscillator settings once and exit
    SetOscillator {
        /// DC offset in volts
        #[arg(long, allow_hyphen_values = true)]
        dc_offset: f64,

        /// AC amplitude in volts
        #[arg(long)]
        ac_amplitude: f64,

        /// Reference frequency in hertz
        #[arg(long)]
        frequency: f64,

        /// Use the synthetic instrument instead of the configured transport
        #[arg(long)]
        mock: bool,
    },

    /// Load, validate and print the effective configuration
    CheckConfig,
}

impl Commands {
    fn mock(&self) -> bool {
        match self {
            Commands::Run { mock, .. }
            | Commands::Readout { mock, .. }
            | Commands::SetOscillator { mock, .. } => *mock,
            Commands::Temperature { .. } | Commands::CheckConfig => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load configuration from '{}'", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;
    if let Some(level) = &cli.log_level {
        settings.application.log_level = level.clone();
    }
    if cli.command.mock() {
        settings.instrument.transport = Transport::Mock;
    }

    chi2_daq::logging::init(&settings.application).context("Failed to initialize logging")?;
    let settings = Arc::new(settings);

    match cli.command {
        Commands::Run { sweep, .. } => run(settings, sweep).await,
        Commands::Readout { output, .. } => readout(settings, output).await,
        Commands::Temperature { output } => temperature(settings, output).await,
        Commands::SetOscillator {
            dc_offset,
            ac_amplitude,
            frequency,
            ..
        } => {
            let params = OscillatorParams {
                dc_offset,
                ac_amplitude,
                frequency,
            };
            set_oscillator(settings, params).await
        }
        Commands::CheckConfig => {
            let text = settings.to_toml().context("Failed to render configuration")?;
            println!("{}", text);
            Ok(())
        }
    }
}

async fn run(settings: Arc<Settings>, sweep: bool) -> Result<()> {
    let connector =
        connector_from_config(&settings.instrument).context("Failed to set up instrument")?;
    let lockin = LockIn::new(connector);

    let tail = session_tail(&settings);

    let session_file = CsvSink::create(
        &settings.paths.output_file,
        SESSION_DESCRIPTION,
        Local::now(),
    )
    .with_context(|| {
        format!(
            "Failed to create session file '{}'",
            settings.paths.output_file.display()
        )
    })?;

    let mut acquisition =
        Acquisition::new(Arc::clone(&settings), lockin, tail).with_sink(Box::new(session_file));

    if sweep {
        let config = settings
            .sweep
            .as_ref()
            .context("--sweep needs a [sweep] section in the configuration")?;
        let values = config
            .load_settings()
            .context("Failed to load sweep settings")?;
        std::fs::create_dir_all(&settings.paths.run_dir).with_context(|| {
            format!(
                "Failed to create run directory '{}'",
                settings.paths.run_dir.display()
            )
        })?;
        info!(
            temp_min = values.temp_min,
            temp_max = values.temp_max,
            dc_offset = values.dc_offset,
            dc_step = values.dc_step,
            "sweep enabled"
        );
        acquisition = acquisition.with_sweep(SweepController::new(values, config));
    }

    stop_on_ctrl_c(acquisition.stop_handle());
    acquisition.run().await.context("Acquisition failed")?;
    Ok(())
}

async fn readout(settings: Arc<Settings>, output: Option<PathBuf>) -> Result<()> {
    let connector =
        connector_from_config(&settings.instrument).context("Failed to set up instrument")?;
    let output = output.unwrap_or_else(|| settings.paths.readout_file.clone());

    let mut readout = Readout::new(&settings, LockIn::new(connector), &output)
        .with_context(|| format!("Failed to create readout file '{}'", output.display()))?;
    stop_on_ctrl_c(readout.stop_handle());
    readout.run().await.context("Readout failed")?;
    Ok(())
}

async fn temperature(settings: Arc<Settings>, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| settings.paths.temperature_file.clone());

    let mut readout = TemperatureReadout::new(&settings, session_tail(&settings), &output)
        .with_context(|| format!("Failed to create temperature file '{}'", output.display()))?;
    stop_on_ctrl_c(readout.stop_handle());
    readout.run().await.context("Temperature readout failed")?;
    Ok(())
}

/// Tail of the temperature log, skipping rows from earlier sessions.
fn session_tail(settings: &Settings) -> LogTail {
    let now = Utc::now();
    let session_start = now.with_nanosecond(0).unwrap_or(now);
    LogTail::new(&settings.paths.temperature_log)
        .with_since(session_start)
        .with_expected_columns(settings.acquisition.expected_columns)
}

async fn set_oscillator(settings: Arc<Settings>, params: OscillatorParams) -> Result<()> {
    let connector =
        connector_from_config(&settings.instrument).context("Failed to set up instrument")?;
    LockIn::new(connector)
        .set_oscillator(params)
        .await
        .context("Failed to set oscillator parameters")?;
    Ok(())
}

fn stop_on_ctrl_c(stop: Arc<AtomicBool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, stopping after the current iteration");
                stop.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });
}
