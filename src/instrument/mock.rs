//! A mock lock-in amplifier that generates synthetic data.
//!
//! Used by `--mock` dry runs and by the test suite. Every command sent through
//! a mock session is recorded so tests can assert on the exact traffic.

use super::lockin::{QUERY_X, QUERY_Y};
use super::{Connector, Session};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy)]
enum Signal {
    /// Slow sine/cosine pair with a little deterministic noise.
    Synthetic,
    /// Fixed output values.
    Constant(f64, f64),
    /// Opening a session always fails.
    Unreachable,
}

#[derive(Default)]
struct MockState {
    sessions: AtomicU64,
    open: AtomicUsize,
    queries: Mutex<Vec<String>>,
    writes: Mutex<Vec<String>>,
}

/// Connector producing [`MockSession`]s.
pub struct MockConnector {
    signal: Signal,
    fault_every: Option<u64>,
    state: Arc<MockState>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Synthetic signal, never fails.
    pub fn new() -> Self {
        Self {
            signal: Signal::Synthetic,
            fault_every: None,
            state: Arc::new(MockState::default()),
        }
    }

    /// Always answer with the given outputs.
    pub fn constant(x: f64, y: f64) -> Self {
        Self {
            signal: Signal::Constant(x, y),
            ..Self::new()
        }
    }

    /// Refuse every connection attempt.
    pub fn unreachable() -> Self {
        Self {
            signal: Signal::Unreachable,
            ..Self::new()
        }
    }

    /// Make queries fail in every `n`th session.
    pub fn with_fault_every(mut self, n: u64) -> Self {
        self.fault_every = Some(n.max(1));
        self
    }

    /// Queries received so far, in order.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.state.queries).clone()
    }

    /// Write commands received so far, in order.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.state.writes).clone()
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> AppResult<Box<dyn Session>> {
        if let Signal::Unreachable = self.signal {
            return Err(DaqError::Instrument(
                "mock instrument unreachable".to_string(),
            ));
        }
        let index = self.state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            index,
            signal: self.signal,
            faulty: self.fault_every.is_some_and(|n| index % n == 0),
            state: self.state.clone(),
            closed: false,
        }))
    }

    fn info(&self) -> String {
        format!("MockConnector({:?})", self.signal)
    }
}

/// One mock connection.
pub struct MockSession {
    index: u64,
    signal: Signal,
    faulty: bool,
    state: Arc<MockState>,
    closed: bool,
}

impl MockSession {
    fn output(&self, channel: u8) -> f64 {
        match self.signal {
            Signal::Constant(x, y) => {
                if channel == 0 {
                    x
                } else {
                    y
                }
            }
            _ => {
                let phase = self.index as f64 * 0.1;
                let noise = (phase * 37.0).sin() * 0.05;
                let value = if channel == 0 { phase.sin() } else { phase.cos() };
                (value + noise) * 1e-3
            }
        }
    }
}

#[async_trait]
impl Session for MockSession {
    async fn query(&mut self, command: &str) -> AppResult<String> {
        lock(&self.state.queries).push(command.to_string());
        if self.faulty {
            return Err(DaqError::Instrument(format!(
                "mock fault on '{}' in session {}",
                command, self.index
            )));
        }
        match command {
            QUERY_X => Ok(self.output(0).to_string()),
            QUERY_Y => Ok(self.output(1).to_string()),
            other => Err(DaqError::Instrument(format!(
                "mock does not understand '{}'",
                other
            ))),
        }
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        lock(&self.state.writes).push(command.to_string());
        Ok(())
    }

    async fn close(&mut self) -> AppResult<()> {
        if !self.closed {
            self.closed = true;
            self.state.open.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
