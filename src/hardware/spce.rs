//! DIGITEL SPCe Pump Controller Driver
//!
//! Protocol Overview:
//! - Format: `~ AA CC DD\r` requests, `AA ST CC DATA CS\r` replies
//! - Baud: 9600, 8N1, no flow control
//! - Default address: 0x05
//! - Commands: 0x01 (controller model), 0x0B (pressure)
//!
//! # Important Notes
//!
//! - The pressure value is read from a fixed 8-byte window at offset 9 of the
//!   reply, as the controller emits it. It is returned as [`RawPressure`]
//!   without numeric interpretation; the field is not guaranteed to be a
//!   clean decimal literal.
//! - Every reply is matched to its request: the echoed address must be ours
//!   and the status must be `OK`.
//! - No retries here. The acquisition loop decides what a failure means.
//!
//! # Example Usage
//!
//! ```no_run
//! use spce_daq::hardware::spce::SpceController;
//! use spce_daq::hardware::transport::{SerialSettings, TransportSession};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = TransportSession::open(&SerialSettings::new("/dev/ttyUSB0")).await?;
//!     let mut spce = SpceController::new(session, 0x05);
//!
//!     println!("Model: {}", spce.identify().await?);
//!     println!("Pressure: {}", spce.read_pressure().await?);
//!     Ok(())
//! }
//! ```

use super::capabilities::PressureGauge;
use super::frame::{
    self, Command, Opcode, ResponseFrame, PRESSURE_FIELD_LEN, PRESSURE_FIELD_OFFSET,
};
use super::transport::TransportSession;
use crate::error::{AppResult, SpceError, TransportError};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, instrument};

/// Factory default RS-232 address of an SPCe.
pub const DEFAULT_ADDRESS: u8 = 0x05;

/// Controller model string, e.g. `DIGITEL SPCe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModel(pub String);

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pressure field exactly as the controller sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPressure(String);

impl RawPressure {
    /// Wrap a raw field.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The untouched 8-byte window.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, if the trimmed field parses as a float (e.g. `1.2E-09`).
    pub fn value(&self) -> Option<f64> {
        self.0.trim().parse().ok()
    }
}

impl fmt::Display for RawPressure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client for one SPCe controller on one serial session.
#[derive(Debug)]
pub struct SpceController {
    session: TransportSession,
    address: u8,
}

impl SpceController {
    /// Client for the controller at `address` on `session`.
    pub fn new(session: TransportSession, address: u8) -> Self {
        Self { session, address }
    }

    /// Address requests are sent to.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Send a command and return the matched reply.
    ///
    /// # Errors
    /// Transport and decode failures propagate unchanged. A reply from another
    /// address is [`SpceError::AddressMismatch`]; a non-OK status is
    /// [`SpceError::Device`].
    pub async fn send(&mut self, command: &Command) -> AppResult<ResponseFrame> {
        let response = self.session.exchange(&command.encode()).await?;
        let frame = frame::decode(&response)?;

        if frame.address != self.address {
            return Err(SpceError::AddressMismatch {
                expected: self.address,
                got: frame.address,
                raw: frame.raw,
            });
        }
        if !frame.is_ok() {
            return Err(SpceError::Device {
                status: frame.status,
                raw: frame.raw,
            });
        }

        debug!(command = %command, response = %frame.raw, "SPCe exchange");
        Ok(frame)
    }

    /// Send `opcode` with the default payload and return the trimmed reply
    /// without any validation. Intended for diagnosing cabling and address
    /// problems.
    ///
    /// # Errors
    /// Only transport failures.
    pub async fn send_raw(&mut self, opcode: u8) -> Result<String, TransportError> {
        let command = Command::new(self.address, opcode);
        let response = self.session.exchange(&command.encode()).await?;
        Ok(String::from_utf8_lossy(&response).trim().to_string())
    }

    /// Query the controller model (command 0x01).
    ///
    /// # Errors
    /// See [`SpceController::send`]; a reply without model text is a
    /// decode error.
    #[instrument(skip(self), fields(address = self.address), err)]
    pub async fn identify(&mut self) -> AppResult<DeviceModel> {
        let frame = self
            .send(&Command::new(self.address, Opcode::GetModel))
            .await?;
        Ok(DeviceModel(frame.descriptive_text()?))
    }

    /// Query the pressure (command 0x0B).
    ///
    /// # Errors
    /// See [`SpceController::send`]; a reply too short for the pressure
    /// window is a decode error.
    #[instrument(skip(self), fields(address = self.address), err)]
    pub async fn read_pressure(&mut self) -> AppResult<RawPressure> {
        let frame = self
            .send(&Command::new(self.address, Opcode::GetPressure))
            .await?;
        let field = frame.fixed_field(PRESSURE_FIELD_OFFSET, PRESSURE_FIELD_LEN)?;
        Ok(RawPressure::new(field))
    }

    /// Release the serial port.
    ///
    /// # Errors
    /// Returns the transport error if the port fails to shut down.
    pub async fn close(self) -> Result<(), TransportError> {
        self.session.close().await
    }
}

#[async_trait]
impl PressureGauge for SpceController {
    async fn read_pressure(&mut self) -> AppResult<RawPressure> {
        SpceController::read_pressure(self).await
    }
}
