//! Configuration system using Figment
//!
//! Configuration is merged from three layers, later layers winning:
//! 1. Built-in defaults (`Settings::default()`)
//! 2. An optional TOML file (`--config chi2.toml`)
//! 3. Environment variables prefixed with `CHI2_`
//!
//! # Environment Variable Overrides
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! CHI2_INSTRUMENT__ADDRESS="GPIB0::7::INSTR"
//! CHI2_ACQUISITION__POLL_INTERVAL_MS=1000
//! CHI2_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```toml
//! [paths]
//! temperature_log = "C:/Chi-2/log.csv"
//! output_file = "C:/Chi-2/Full_Data.csv"
//! run_dir = "C:/Chi-2/Run Files"
//!
//! [instrument]
//! transport = "visa"
//! address = "GPIB0::13::INSTR"
//!
//! [sweep]
//! settings_file = "C:/Chi-2/settings.txt"
//! ```
//!
//! # Features
//!
//! The default transport is VISA, but the default build only carries the
//! serial and mock transports. Build the lab binary with
//! `cargo build --release --features lab` (or `--features full`) so that
//! `transport = "visa"` can open a session. Plain builds must select
//! `transport = "serial"` or `transport = "mock"`.
//!
//! The sweep controller's experiment parameters can also be read from the
//! plain `key=value` settings file used on the lab machine, see
//! [`SweepSettings::from_key_value_file`].

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "CHI2_";

/// Top-level configuration, built once at startup and shared read-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Input and output file locations
    #[serde(default)]
    pub paths: PathsConfig,
    /// Lock-in amplifier connection
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// Loop cadence and buffer sizes
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Sweep controller, only used with `run --sweep`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Chi-2 DAQ".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, ANSI coloured
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// File locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Append-only log written by the temperature controller
    pub temperature_log: PathBuf,
    /// Session CSV holding every correlated record
    pub output_file: PathBuf,
    /// Directory receiving one `Run_<n>.csv` per sweep run
    pub run_dir: PathBuf,
    /// Output of the instrument-only `readout` command
    #[serde(default = "default_readout_file")]
    pub readout_file: PathBuf,
    /// Output of the temperature-only `temperature` command
    #[serde(default = "default_temperature_file")]
    pub temperature_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temperature_log: PathBuf::from("log.csv"),
            output_file: PathBuf::from("Full_Data.csv"),
            run_dir: PathBuf::from("Run Files"),
            readout_file: default_readout_file(),
            temperature_file: default_temperature_file(),
        }
    }
}

/// Which transport the lock-in amplifier is reached through.
///
/// The default, [`Transport::Visa`], needs a build with the `instrument_visa`
/// feature (`--features lab`); other builds report `FeatureNotEnabled` when
/// the connector is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// VISA resource string (GPIB, USB, TCPIP)
    #[default]
    Visa,
    /// RS-232 port name
    Serial,
    /// Synthetic instrument for dry runs
    Mock,
}

/// Lock-in amplifier connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Transport used to open a session
    #[serde(default)]
    pub transport: Transport,
    /// VISA resource string or serial port name
    pub address: String,
    /// Baud rate, serial transport only
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-query timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl InstrumentConfig {
    /// Per-query timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            address: "GPIB0::13::INSTR".to_string(),
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Loop cadence and in-memory buffer sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Sleep between loop iterations in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum instrument readings kept for correlation
    #[serde(default = "default_buffer_cap")]
    pub reading_buffer_cap: usize,
    /// Maximum correlated records kept for plotting
    #[serde(default = "default_buffer_cap")]
    pub history_cap: usize,
    /// Refresh the plot once every N correlation batches
    #[serde(default = "default_plot_every")]
    pub plot_every: u32,
    /// Evaluate the sweep controller once every N correlation batches
    #[serde(default = "default_trend_every")]
    pub trend_every: u32,
    /// Reject log rows whose column count differs (e.g. 22 for the wide format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_columns: Option<usize>,
}

impl AcquisitionConfig {
    /// Sleep between loop iterations.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            reading_buffer_cap: default_buffer_cap(),
            history_cap: default_buffer_cap(),
            plot_every: default_plot_every(),
            trend_every: default_trend_every(),
            expected_columns: None,
        }
    }
}

/// Sweep controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Lab `key=value` settings file holding the experiment parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    /// Inline experiment parameters, used when no settings file is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<SweepSettings>,
    /// Distance in kelvin within which a plateau counts as reached
    #[serde(default = "default_temperature_window")]
    pub temperature_window: f64,
    /// Number of most recent temperatures used for trend detection
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
}

impl SweepConfig {
    /// Resolve the experiment parameters, preferring the settings file.
    pub fn load_settings(&self) -> AppResult<SweepSettings> {
        match (&self.settings_file, &self.values) {
            (Some(path), _) => SweepSettings::from_key_value_file(path),
            (None, Some(values)) => Ok(values.clone()),
            (None, None) => Err(DaqError::Configuration(
                "sweep requires either 'settings_file' or a [sweep.values] table".to_string(),
            )),
        }
    }
}

/// Experiment parameters for the stepped DC-offset sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Lower plateau in kelvin; a run starts here
    pub temp_min: f64,
    /// Upper plateau in kelvin; a run stops here
    pub temp_max: f64,
    /// Oscillator amplitude in volts during a run
    pub ac_voltage: f64,
    /// DC offset of the first run in volts
    pub dc_offset: f64,
    /// DC offset increment between runs in volts
    pub dc_step: f64,
    /// Oscillator frequency in hertz
    pub frequency: f64,
    /// Expected warming ramp in kelvin per minute
    pub warming_ramp_rate: f64,
}

impl SweepSettings {
    const KEYS: [&'static str; 7] = [
        "temp_min",
        "temp_max",
        "ac_voltage",
        "dc_offset",
        "dc_step",
        "frequency",
        "warming_ramp_rate",
    ];

    /// Slope below which the temperature counts as steady:
    /// 20 % of the expected per-sample warming slope.
    pub fn steady_tolerance(&self) -> f64 {
        self.warming_ramp_rate / 60.0 * 0.2
    }

    /// Read a `key=value` settings file.
    pub fn from_key_value_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Configuration(format!(
                "failed to read sweep settings '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_key_value(&text)
    }

    /// Parse `key=value` lines. `#` comments and blank lines are ignored, so
    /// are unknown keys. Every recognised key must be present and numeric.
    pub fn parse_key_value(text: &str) -> AppResult<Self> {
        let mut values: [Option<f64>; 7] = [None; 7];

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                DaqError::Configuration(format!(
                    "line {}: expected key=value, got '{}'",
                    line_no + 1,
                    line
                ))
            })?;
            let key = key.trim();
            let Some(slot) = Self::KEYS.iter().position(|k| *k == key) else {
                tracing::debug!(key, "ignoring unknown sweep setting");
                continue;
            };
            let parsed = value.trim().parse::<f64>().map_err(|_| {
                DaqError::Configuration(format!(
                    "line {}: '{}' is not a number for '{}'",
                    line_no + 1,
                    value.trim(),
                    key
                ))
            })?;
            values[slot] = Some(parsed);
        }

        let get = |i: usize| {
            values[i].ok_or_else(|| {
                DaqError::Configuration(format!("missing sweep setting '{}'", Self::KEYS[i]))
            })
        };

        Ok(Self {
            temp_min: get(0)?,
            temp_max: get(1)?,
            ac_voltage: get(2)?,
            dc_offset: get(3)?,
            dc_step: get(4)?,
            frequency: get(5)?,
            warming_ramp_rate: get(6)?,
        })
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and `CHI2_` env vars.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(DaqError::Configuration(format!(
                    "config file '{}' does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    /// Extract and validate settings from a prepared figment.
    pub fn from_figment(figment: Figment) -> AppResult<Self> {
        let settings: Settings = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that parse but cannot drive the loop.
    pub fn validate(&self) -> AppResult<()> {
        if self.instrument.address.trim().is_empty() {
            return Err(DaqError::Configuration(
                "instrument.address must not be empty".to_string(),
            ));
        }
        if self.acquisition.poll_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "acquisition.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.acquisition.reading_buffer_cap == 0 || self.acquisition.history_cap == 0 {
            return Err(DaqError::Configuration(
                "acquisition buffer caps must be positive".to_string(),
            ));
        }
        if self.acquisition.plot_every == 0 || self.acquisition.trend_every == 0 {
            return Err(DaqError::Configuration(
                "acquisition.plot_every and trend_every must be positive".to_string(),
            ));
        }
        if let Some(sweep) = &self.sweep {
            if sweep.trend_window < 2 {
                return Err(DaqError::Configuration(
                    "sweep.trend_window needs at least 2 points".to_string(),
                ));
            }
            if sweep.temperature_window < 0.0 {
                return Err(DaqError::Configuration(
                    "sweep.temperature_window must not be negative".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Render the effective settings as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| DaqError::Configuration(e.to_string()))
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_readout_file() -> PathBuf {
    PathBuf::from("lockin_data.csv")
}

fn default_temperature_file() -> PathBuf {
    PathBuf::from("Temperature_log.csv")
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_buffer_cap() -> usize {
    2000
}

fn default_plot_every() -> u32 {
    3
}

fn default_trend_every() -> u32 {
    16
}

fn default_temperature_window() -> f64 {
    0.01
}

fn default_trend_window() -> usize {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LAB_SETTINGS: &str = "\
# Chi-2 sweep
temp_min=10
temp_max = 20.5

ac_voltage=0.1
dc_offset=0.0
dc_step=0.05
frequency=808e3
warming_ramp_rate=0.5
comment=not a number but unknown
";

    #[test]
    fn test_defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.instrument.address, "GPIB0::13::INSTR");
        assert_eq!(settings.acquisition.poll_interval(), Duration::from_millis(500));
        assert_eq!(settings.acquisition.history_cap, 2000);
        assert_eq!(
            settings.paths.temperature_file,
            PathBuf::from("Temperature_log.csv")
        );
    }

    #[test]
    fn test_parse_key_value_settings() {
        let s = SweepSettings::parse_key_value(LAB_SETTINGS).unwrap();
        assert_eq!(s.temp_min, 10.0);
        assert_eq!(s.temp_max, 20.5);
        assert_eq!(s.frequency, 808e3);
        assert!((s.steady_tolerance() - 0.5 / 60.0 * 0.2).abs() < 1e-15);
    }

    #[test]
    fn test_parse_key_value_missing_key() {
        let err = SweepSettings::parse_key_value("temp_min=1\n").unwrap_err();
        assert!(err.to_string().contains("temp_max"));
    }

    #[test]
    fn test_parse_key_value_non_numeric() {
        let text = LAB_SETTINGS.replace("dc_step=0.05", "dc_step=fast");
        let err = SweepSettings::parse_key_value(&text).unwrap_err();
        assert!(err.to_string().contains("dc_step"));
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[instrument]
transport = "mock"
address = "mock0"

[acquisition]
poll_interval_ms = 100
history_cap = 50

[sweep]
temperature_window = 0.02

[sweep.values]
temp_min = 5.0
temp_max = 7.0
ac_voltage = 0.1
dc_offset = 0.0
dc_step = 0.1
frequency = 1000.0
warming_ramp_rate = 1.0
"#
        )
        .unwrap();

        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(file.path()));
        let settings = Settings::from_figment(figment).unwrap();
        assert_eq!(settings.instrument.transport, Transport::Mock);
        assert_eq!(settings.acquisition.history_cap, 50);
        assert_eq!(settings.acquisition.reading_buffer_cap, 2000);
        let sweep = settings.sweep.unwrap();
        assert_eq!(sweep.trend_window, 60);
        assert_eq!(sweep.load_settings().unwrap().temp_max, 7.0);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut settings = Settings::default();
        settings.acquisition.poll_interval_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Settings::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_sweep_without_source_is_error() {
        let sweep = SweepConfig {
            settings_file: None,
            values: None,
            temperature_window: 0.01,
            trend_window: 60,
        };
        assert!(sweep.load_settings().is_err());
    }

    #[test]
    fn test_to_toml_round_trips_through_figment() {
        let text = Settings::default().to_toml().unwrap();
        let settings = Settings::from_figment(Figment::from(Toml::string(&text))).unwrap();
        assert_eq!(settings.paths.output_file, PathBuf::from("Full_Data.csv"));
    }
}
