//! VISA transport for GPIB/USB/Ethernet instruments
//!
//! Wraps the `visa-rs` crate. VISA calls are synchronous, so every open,
//! query and write runs on Tokio's blocking task executor.
//!
//! Supports resource strings like:
//! - "GPIB0::13::INSTR" (GPIB interface)
//! - "USB0::0xB506::0x2000::002765::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)

use super::{Connector, Session};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_visa")]
use std::sync::Arc;
#[cfg(feature = "instrument_visa")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_visa")]
use tracing::debug;

/// Line terminator appended to every command.
#[cfg(feature = "instrument_visa")]
const LINE_TERMINATOR: &str = "\n";

/// Opens VISA sessions to one resource.
#[derive(Debug)]
pub struct VisaConnector {
    /// VISA resource string (e.g., "GPIB0::13::INSTR")
    pub(crate) resource_string: String,

    /// Open and per-transaction I/O timeout
    pub(crate) timeout: Duration,
}

impl VisaConnector {
    /// Create a connector for `resource_string`.
    ///
    /// Fails with [`DaqError::FeatureNotEnabled`] when built without
    /// `instrument_visa`.
    pub fn new(resource_string: String, timeout: Duration) -> AppResult<Self> {
        if cfg!(not(feature = "instrument_visa")) {
            return Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()));
        }
        Ok(Self {
            resource_string,
            timeout,
        })
    }
}

/// VISA timeout attribute in milliseconds, saturating at `u32::MAX`.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(feature = "instrument_visa")]
struct VisaHandle {
    // The resource manager owns every session opened through it; it must
    // outlive `instrument`.
    _rm: visa_rs::DefaultRM,
    instrument: visa_rs::Instrument,
}

/// One open VISA session.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
pub struct VisaSession {
    resource_string: String,
    timeout: Duration,
    #[cfg(feature = "instrument_visa")]
    handle: Option<Arc<Mutex<VisaHandle>>>,
}

#[cfg(feature = "instrument_visa")]
fn visa_err(context: &str, resource: &str, e: impl std::fmt::Display) -> DaqError {
    DaqError::Instrument(format!("{} '{}': {}", context, resource, e))
}

#[async_trait]
impl Connector for VisaConnector {
    #[cfg(feature = "instrument_visa")]
    async fn open(&self) -> AppResult<Box<dyn Session>> {
        use std::ffi::CString;
        use visa_rs::prelude::*;

        let resource = self.resource_string.clone();
        let timeout = self.timeout;

        let handle = tokio::task::spawn_blocking(move || -> AppResult<VisaHandle> {
            let rm = DefaultRM::new()
                .map_err(|e| visa_err("Failed to create VISA resource manager for", &resource, e))?;
            let name = CString::new(resource.clone())
                .map_err(|e| visa_err("Invalid VISA resource string", &resource, e))?;
            let instrument = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .map_err(|e| visa_err("Failed to open VISA resource", &resource, e))?;
            Ok(VisaHandle {
                _rm: rm,
                instrument,
            })
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("VISA open task panicked: {}", e)))??;

        debug!(
            "VISA resource '{}' opened with {}ms timeout",
            self.resource_string,
            self.timeout.as_millis()
        );
        Ok(Box::new(VisaSession {
            resource_string: self.resource_string.clone(),
            timeout: self.timeout,
            handle: Some(Arc::new(Mutex::new(handle))),
        }))
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn open(&self) -> AppResult<Box<dyn Session>> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    fn info(&self) -> String {
        format!(
            "VisaConnector({} @ {}ms timeout)",
            self.resource_string,
            self.timeout.as_millis()
        )
    }
}

#[cfg(feature = "instrument_visa")]
impl VisaSession {
    fn handle(&self) -> AppResult<Arc<Mutex<VisaHandle>>> {
        self.handle.clone().ok_or_else(|| {
            DaqError::Instrument(format!("VISA session '{}' is closed", self.resource_string))
        })
    }

    /// Write `command` and, for queries, read one response line.
    async fn transact(&self, command: &str, expect_response: bool) -> AppResult<String> {
        let handle = self.handle()?;
        let command_str = format!("{}{}", command, LINE_TERMINATOR);
        let command_for_log = command.to_string();
        let resource = self.resource_string.clone();
        let timeout_ms = timeout_millis(self.timeout);

        // Execute blocking VISA I/O on dedicated thread
        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{BufRead, BufReader, Write};

            let mut guard = handle.blocking_lock();
            guard
                .instrument
                .set_timeout(timeout_ms)
                .map_err(|e| visa_err(&format!("Failed to set {}ms VISA timeout on", timeout_ms), &resource, e))?;
            guard
                .instrument
                .write_all(command_str.as_bytes())
                .map_err(|e| visa_err(&format!("VISA write '{}' failed on", command_for_log), &resource, e))?;

            if !expect_response {
                debug!("VISA command sent: {}", command_for_log);
                return Ok(String::new());
            }

            let mut response = String::new();
            BufReader::new(&guard.instrument)
                .read_line(&mut response)
                .map_err(|e| visa_err(&format!("VISA query '{}' failed on", command_for_log), &resource, e))?;
            let response = response.trim().to_string();
            debug!("VISA query '{}' -> '{}'", command_for_log, response);
            Ok(response)
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("VISA I/O task panicked: {}", e)))?
    }
}

#[async_trait]
impl Session for VisaSession {
    #[cfg(feature = "instrument_visa")]
    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.transact(command, true).await
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn query(&mut self, _command: &str) -> AppResult<String> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    #[cfg(feature = "instrument_visa")]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        self.transact(command, false).await.map(|_| ())
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn write(&mut self, _command: &str) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled("instrument_visa".to_string()))
    }

    async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_visa")]
        {
            if self.handle.take().is_some() {
                debug!("VISA resource '{}' closed", self.resource_string);
            }
        }
        Ok(())
    }
}
