//! Core library for the chi2_daq application.
//!
//! This library polls an SR865A-class lock-in amplifier, tails the append-only
//! log of an external temperature controller, pairs every new temperature
//! sample with the nearest instrument reading and stores the result. It is
//! used by the `chi2_daq` binary and by the integration tests.
//!
//! ```text
//! LogTail ──samples──┐
//!                    ├─► correlate ──CorrelatedRecord──► sinks, history, plot
//! LockIn::poll ──────┘                                    └─► sweep controller
//! ```

pub mod acquisition;
pub mod config;
pub mod core;
pub mod correlate;
pub mod error;
pub mod history;
pub mod instrument;
pub mod log_tail;
pub mod logging;
pub mod plot;
pub mod storage;
pub mod sweep;
