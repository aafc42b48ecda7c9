//! RS-232 transport
//!
//! Wraps the serialport crate. Serial I/O is blocking, so it runs on Tokio's
//! blocking task executor. Commands are terminated with `\n` and responses are
//! read byte by byte up to the next `\n`.

use super::{Connector, Session};
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;
#[cfg(feature = "instrument_serial")]
use tracing::debug;

/// Opens serial sessions on one port.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Overall response timeout
    timeout: Duration,
}

impl SerialConnector {
    /// Create a connector for `port_name`.
    ///
    /// Fails with [`DaqError::FeatureNotEnabled`] when built without
    /// `instrument_serial`.
    pub fn new(port_name: String, baud_rate: u32, timeout: Duration) -> AppResult<Self> {
        if cfg!(not(feature = "instrument_serial")) {
            return Err(DaqError::FeatureNotEnabled(
                "instrument_serial".to_string(),
            ));
        }
        Ok(Self {
            port_name,
            baud_rate,
            timeout,
        })
    }
}

/// One open serial session.
#[cfg_attr(not(feature = "instrument_serial"), allow(dead_code))]
pub struct SerialSession {
    port_name: String,
    timeout: Duration,
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

#[async_trait]
impl Connector for SerialConnector {
    #[cfg(feature = "instrument_serial")]
    async fn open(&self) -> AppResult<Box<dyn Session>> {
        let port_name = self.port_name.clone();
        let baud_rate = self.baud_rate;

        let port = tokio::task::spawn_blocking(move || {
            serialport::new(&port_name, baud_rate)
                .timeout(Duration::from_millis(100)) // Internal read timeout
                .open()
                .map_err(|e| {
                    DaqError::Instrument(format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        port_name, baud_rate, e
                    ))
                })
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("Serial open task panicked: {}", e)))??;

        debug!(
            "Serial port '{}' opened at {} baud",
            self.port_name, self.baud_rate
        );
        Ok(Box::new(SerialSession {
            port_name: self.port_name.clone(),
            timeout: self.timeout,
            port: Some(Arc::new(Mutex::new(port))),
        }))
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn open(&self) -> AppResult<Box<dyn Session>> {
        Err(DaqError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }

    fn info(&self) -> String {
        format!(
            "SerialConnector({} @ {} baud, {}ms timeout)",
            self.port_name,
            self.baud_rate,
            self.timeout.as_millis()
        )
    }
}

#[cfg(feature = "instrument_serial")]
impl SerialSession {
    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or_else(|| {
            DaqError::Instrument(format!("Serial port '{}' is closed", self.port_name))
        })
    }

    async fn transact(&self, command: &str, expect_response: bool) -> AppResult<String> {
        let port = self.port()?;
        let command_str = format!("{}\n", command);
        let command_for_log = command.to_string();
        let timeout = self.timeout;

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut port_guard = port.blocking_lock();
            port_guard
                .write_all(command_str.as_bytes())
                .and_then(|()| port_guard.flush())
                .map_err(|e| DaqError::Instrument(format!("Failed to write to serial port: {}", e)))?;
            debug!("Sent serial command: {}", command_for_log);

            if !expect_response {
                return Ok(String::new());
            }

            // Read response byte-by-byte until delimiter
            let mut response = Vec::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(DaqError::Instrument(format!(
                        "Serial read timeout after {:?} waiting for '{}'",
                        timeout, command_for_log
                    )));
                }

                match port_guard.read(&mut buffer) {
                    Ok(0) => {
                        return Err(DaqError::Instrument(
                            "Unexpected EOF from serial port".to_string(),
                        ));
                    }
                    Ok(_) => {
                        if buffer[0] == b'\n' {
                            break;
                        }
                        response.push(buffer[0]);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port timeout is shorter than our overall timeout
                        continue;
                    }
                    Err(e) => {
                        return Err(DaqError::Instrument(format!("Serial read error: {}", e)));
                    }
                }
            }

            let response = String::from_utf8_lossy(&response).trim().to_string();
            debug!("Received serial response: {}", response);
            Ok(response)
        })
        .await
        .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {}", e)))?
    }
}

#[async_trait]
impl Session for SerialSession {
    #[cfg(feature = "instrument_serial")]
    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.transact(command, true).await
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn query(&mut self, _command: &str) -> AppResult<String> {
        Err(DaqError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }

    #[cfg(feature = "instrument_serial")]
    async fn write(&mut self, command: &str) -> AppResult<()> {
        self.transact(command, false).await.map(|_| ())
    }

    #[cfg(not(feature = "instrument_serial"))]
    async fn write(&mut self, _command: &str) -> AppResult<()> {
        Err(DaqError::FeatureNotEnabled(
            "instrument_serial".to_string(),
        ))
    }

    async fn close(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
        Ok(())
    }
}
