//! SR865A-style lock-in amplifier driver.
//!
//! Reads the in-phase and out-of-phase outputs and writes the internal
//! oscillator settings. Each call opens and closes its own session.

use super::{Connector, Session};
use crate::core::{InstrumentReading, LockInValues, OscillatorParams};
use crate::error::{AppResult, DaqError};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Query for the in-phase output (X).
pub const QUERY_X: &str = "OUTP? 0";
/// Query for the out-of-phase output (Y).
pub const QUERY_Y: &str = "OUTP? 1";

/// Lock-in amplifier reached through a [`Connector`].
#[derive(Clone)]
pub struct LockIn {
    connector: Arc<dyn Connector>,
}

impl LockIn {
    /// Wrap a connector.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Poll both outputs.
    ///
    /// Returns `None` on any communication or parse fault; the fault is
    /// logged and the caller should skip this poll.
    pub async fn poll(&self) -> Option<InstrumentReading> {
        match self.read_outputs().await {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!("Lock-in poll failed, no reading this cycle: {}", e);
                None
            }
        }
    }

    /// Poll both outputs, reporting faults to the caller.
    pub async fn read_outputs(&self) -> AppResult<InstrumentReading> {
        let mut session = self.connector.open().await?;
        let values = query_values(session.as_mut()).await;
        let captured_at = Utc::now();
        close_quietly(session.as_mut()).await;

        Ok(InstrumentReading {
            captured_at,
            values: values?,
        })
    }

    /// Write DC offset, AC amplitude and frequency in one session.
    pub async fn set_oscillator(&self, params: OscillatorParams) -> AppResult<()> {
        let mut session = self.connector.open().await?;
        let result = write_oscillator(session.as_mut(), params).await;
        close_quietly(session.as_mut()).await;
        result
    }
}

async fn query_values(session: &mut dyn Session) -> AppResult<LockInValues> {
    let x = parse_response(QUERY_X, &session.query(QUERY_X).await?)?;
    let y = parse_response(QUERY_Y, &session.query(QUERY_Y).await?)?;
    Ok(LockInValues { x, y })
}

async fn write_oscillator(session: &mut dyn Session, params: OscillatorParams) -> AppResult<()> {
    session.write(&format!("SOFF {}", params.dc_offset)).await?;
    info!("Set DC offset to {} V", params.dc_offset);
    session.write(&format!("SLVL {}", params.ac_amplitude)).await?;
    info!("Set AC amplitude to {} V", params.ac_amplitude);
    session.write(&format!("FREQ {}", params.frequency)).await?;
    info!("Set frequency to {} Hz", params.frequency);
    Ok(())
}

async fn close_quietly(session: &mut dyn Session) {
    if let Err(e) = session.close().await {
        debug!("Ignoring error while closing instrument session: {}", e);
    }
}

/// Parse an ASCII float response, e.g. `"-1.2345e-06\n"`.
pub fn parse_response(command: &str, response: &str) -> AppResult<f64> {
    let trimmed = response.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            DaqError::Instrument(format!(
                "unparsable response to '{}': '{}'",
                command, trimmed
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockConnector;
    use tracing_test::traced_test;

    #[test]
    fn test_parse_response() {
        assert_eq!(parse_response(QUERY_X, " 1.5E-3\r\n").unwrap(), 1.5e-3);
        assert!(parse_response(QUERY_X, "").is_err());
        assert!(parse_response(QUERY_X, "ERR").is_err());
        assert!(parse_response(QUERY_X, "nan").is_err());
    }

    #[tokio::test]
    async fn test_poll_returns_reading() {
        let mock = Arc::new(MockConnector::constant(0.25, -0.5));
        let lockin = LockIn::new(mock.clone());
        let reading = lockin.poll().await.unwrap();
        assert_eq!(reading.values, LockInValues { x: 0.25, y: -0.5 });
        assert_eq!(mock.queries(), vec![QUERY_X.to_string(), QUERY_Y.to_string()]);
        assert_eq!(mock.open_sessions(), 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_poll_fault_is_sentinel() {
        let mock = Arc::new(MockConnector::new().with_fault_every(1));
        let lockin = LockIn::new(mock.clone());
        assert!(lockin.poll().await.is_none());
        assert_eq!(mock.open_sessions(), 0);
        assert!(logs_contain("Lock-in poll failed"));
    }

    #[tokio::test]
    async fn test_unreachable_instrument_is_sentinel() {
        let lockin = LockIn::new(Arc::new(MockConnector::unreachable()));
        assert!(lockin.poll().await.is_none());
        assert!(lockin.read_outputs().await.is_err());
    }

    #[tokio::test]
    async fn test_set_oscillator_commands() {
        let mock = Arc::new(MockConnector::new());
        let lockin = LockIn::new(mock.clone());
        lockin
            .set_oscillator(OscillatorParams {
                dc_offset: 0.5,
                ac_amplitude: 1.0,
                frequency: 808e3,
            })
            .await
            .unwrap();
        assert_eq!(
            mock.writes(),
            vec!["SOFF 0.5", "SLVL 1", "FREQ 808000"]
        );
        assert_eq!(mock.open_sessions(), 0);
    }
}
