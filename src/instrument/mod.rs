//! Lock-in amplifier access.
//!
//! Every instrument operation follows the same scoped lifecycle: open a
//! [`Session`] through a [`Connector`], issue the commands, close the session.
//! Nothing is kept open between polls, so a power-cycled or re-cabled
//! instrument is picked up again on the next iteration.
//!
//! Transports:
//! - [`visa::VisaConnector`]: GPIB / USB / TCPIP through the system VISA
//!   library (feature `instrument_visa`)
//! - [`serial::SerialConnector`]: RS-232 (feature `instrument_serial`)
//! - [`mock::MockConnector`]: synthetic signal for dry runs and tests

pub mod lockin;
pub mod mock;
pub mod serial;
pub mod visa;

pub use lockin::LockIn;
pub use mock::MockConnector;

use crate::config::{InstrumentConfig, Transport};
use crate::error::AppResult;
use async_trait::async_trait;
use std::sync::Arc;

/// An open connection to the instrument, valid for one operation.
#[async_trait]
pub trait Session: Send {
    /// Send a query and return the trimmed response line.
    async fn query(&mut self, command: &str) -> AppResult<String>;

    /// Send a command that produces no response.
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Release the connection. The session must not be used afterwards.
    async fn close(&mut self) -> AppResult<()>;
}

/// Factory for instrument sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh session.
    async fn open(&self) -> AppResult<Box<dyn Session>>;

    /// Human readable description for logs.
    fn info(&self) -> String;
}

/// Build the connector selected in the configuration.
pub fn connector_from_config(config: &InstrumentConfig) -> AppResult<Arc<dyn Connector>> {
    let connector: Arc<dyn Connector> = match config.transport {
        Transport::Visa => Arc::new(visa::VisaConnector::new(
            config.address.clone(),
            config.timeout(),
        )?),
        Transport::Serial => Arc::new(serial::SerialConnector::new(
            config.address.clone(),
            config.baud_rate,
            config.timeout(),
        )?),
        Transport::Mock => Arc::new(MockConnector::new()),
    };
    tracing::info!("Using instrument transport {}", connector.info());
    Ok(connector)
}
