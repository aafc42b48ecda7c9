//! Sweep controller driven through the acquisition loop.

#![cfg(feature = "storage_csv")]

use chi2_daq::{
    acquisition::Acquisition,
    config::{Settings, SweepConfig, SweepSettings},
    instrument::{LockIn, MockConnector},
    log_tail::LogTail,
    storage::BANNER_SEPARATOR,
    sweep::{SweepController, SweepState},
};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

fn plateau(start: i64, temperature: f64, n: usize) -> String {
    (0..n)
        .map(|i| format!("{},{}\n", start + i as i64, temperature))
        .collect()
}

fn sweep_values() -> SweepSettings {
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

#[tokio::test]
async fn test_full_run_between_plateaus() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.csv");
    let run_dir = dir.path().join("Run Files");
    append(&log, "[Data]\n");

    let config = SweepConfig {
        settings_file: None,
        values: Some(sweep_values()),
        temperature_window: 0.01,
        trend_window: 60,
    };
    let mut settings = Settings::default();
    settings.paths.run_dir = run_dir.clone();
    settings.acquisition.trend_every = 1;
    settings.sweep = Some(config.clone());

    let mock = Arc::new(MockConnector::constant(2e-6, 1e-6));
    let controller = SweepController::new(sweep_values(), &config);
    let mut acq = Acquisition::new(
        Arc::new(settings),
        LockIn::new(mock.clone()),
        LogTail::new(&log),
    )
    .with_sweep(controller);
    assert_eq!(acq.sweep_state(), Some(SweepState::Idle));

    // Steady at the lower plateau: the run starts.
    append(&log, &plateau(1_700_000_000, 10.0, 60));
    acq.run_iteration().await.unwrap();
    assert_eq!(acq.sweep_state(), Some(SweepState::Recording));
    assert_eq!(mock.writes(), vec!["SOFF 0.1", "SLVL 0.5", "FREQ 808000"]);

    let run_file = run_dir.join("Run_1.csv");
    let text = std::fs::read_to_string(&run_file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], BANNER_SEPARATOR);
    assert_eq!(lines[2], "Run: 1. DC_offset: 0.1V");
    assert_eq!(lines.len(), 5);

    // Steady at the upper plateau: rows land in the run file, then it stops.
    append(&log, &plateau(1_700_000_060, 20.0, 60));
    acq.run_iteration().await.unwrap();
    assert_eq!(acq.sweep_state(), Some(SweepState::Idle));
    assert_eq!(
        mock.writes()[3..],
        ["SOFF 0.001", "SLVL 0.001", "FREQ 808000"]
    );
    assert_eq!(std::fs::read_to_string(&run_file).unwrap().lines().count(), 5 + 60);

    // Idle again: further rows do not touch the finished run file.
    append(&log, &plateau(1_700_000_120, 15.0, 10));
    acq.run_iteration().await.unwrap();
    assert_eq!(std::fs::read_to_string(&run_file).unwrap().lines().count(), 5 + 60);
    assert!(!run_dir.join("Run_2.csv").exists());
}

#[tokio::test]
async fn test_unsteady_plateau_waits() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log.csv");
    append(&log, "[Data]\n");

    let config = SweepConfig {
        settings_file: None,
        values: Some(sweep_values()),
        temperature_window: 0.01,
        trend_window: 60,
    };
    let mut settings = Settings::default();
    settings.paths.run_dir = dir.path().join("runs");
    settings.acquisition.trend_every = 1;

    let mock = Arc::new(MockConnector::constant(0.0, 0.0));
    let mut acq = Acquisition::new(Arc::new(settings), LockIn::new(mock.clone()), LogTail::new(&log))
        .with_sweep(SweepController::new(sweep_values(), &config));

    // Cooling fast onto temp_min.
    let cooling: String = (0..60)
        .map(|i| format!("{},{}\n", 1_700_000_000 + i, 10.0 + (59 - i) as f64 * 0.1))
        .collect();
    append(&log, &cooling);
    acq.run_iteration().await.unwrap();

    assert_eq!(acq.sweep_state(), Some(SweepState::WaitingForSteadyAtMin));
    assert!(mock.writes().is_empty());
    assert!(!dir.path().join("runs").join("Run_1.csv").exists());
}
