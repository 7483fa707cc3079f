//! Serial transport session for the SPCe controller
//!
//! A [`TransportSession`] exclusively owns one serial connection and performs
//! strictly serialized request/response exchanges over it:
//!
//! 1. discard stale input (bytes left in the read buffer plus anything the
//!    port delivers within the drain window),
//! 2. write and flush the request,
//! 3. read until the CR delimiter or until the read timeout elapses.
//!
//! A timeout is not an error here: whatever was accumulated (possibly
//! nothing) is returned and the frame codec rejects it. Link failures are
//! reported as [`TransportError`].
//!
//! Lifecycle: [`TransportSession::open`] → [`TransportSession::exchange`]* →
//! [`TransportSession::close`].

use super::frame::FRAME_DELIMITER;
use crate::error::TransportError;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::spawn_blocking;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, trace};

/// Trait alias for async serial port I/O.
///
/// Implemented by `tokio_serial::SerialStream` (hardware),
/// [`MockSerialPort`](super::mock_serial::MockSerialPort) and
/// `tokio::io::DuplexStream` (tests).
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Default SPCe line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default bound on waiting for a reply.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Default window for discarding stale input before a write.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// Serial line parameters. Framing is always 8N1 without flow control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Port path (e.g. "/dev/ttyUSB0", "COM5")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Maximum wait for the response delimiter
    pub read_timeout: Duration,
    /// Window for discarding stale input before each request
    pub drain_timeout: Duration,
}

impl SerialSettings {
    /// Settings for `port` with SPCe defaults (9600 baud, 500 ms timeout).
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the stale-input drain window
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// One open serial connection.
pub struct TransportSession {
    port: BufReader<DynSerial>,
    settings: SerialSettings,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// Open the serial port described by `settings`.
    ///
    /// The blocking open runs on `spawn_blocking` so it cannot stall the
    /// runtime.
    ///
    /// # Errors
    /// Returns [`TransportError::Open`] if the port cannot be opened.
    pub async fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let port_name = settings.port.clone();
        let baud_rate = settings.baud_rate;

        let stream = spawn_blocking(move || {
            tokio_serial::new(&port_name, baud_rate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::None)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::None)
                .open_native_async()
                .map_err(|source| TransportError::Open {
                    port: port_name,
                    baud_rate,
                    source,
                })
        })
        .await??;

        debug!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "serial port opened (8N1)"
        );
        Ok(Self::from_port(Box::new(stream), settings.clone()))
    }

    /// Wrap an already open port (mock or duplex stream in tests).
    pub fn from_port(port: DynSerial, settings: SerialSettings) -> Self {
        Self {
            port: BufReader::new(port),
            settings,
        }
    }

    /// Line parameters of this session.
    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }

    /// Send `request` and collect the reply.
    ///
    /// Returns the bytes read up to and including the CR delimiter, or the
    /// partial (possibly empty) bytes if the read timeout elapsed first.
    ///
    /// # Errors
    /// Returns a [`TransportError`] if writing or reading fails, or if the
    /// port reports end-of-stream.
    pub async fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let discarded = self.drain_stale_input().await?;
        if discarded > 0 {
            debug!(port = %self.settings.port, discarded, "discarded stale input");
        }

        trace!(
            port = %self.settings.port,
            request = %request.escape_ascii(),
            "sending request"
        );
        let writer = self.port.get_mut();
        let written = async {
            writer.write_all(request).await?;
            writer.flush().await
        }
        .await;
        written.map_err(|source| TransportError::Write {
            port: self.settings.port.clone(),
            source,
        })?;

        let mut response = Vec::new();
        match tokio::time::timeout(
            self.settings.read_timeout,
            self.port.read_until(FRAME_DELIMITER, &mut response),
        )
        .await
        {
            Ok(Ok(_)) if response.last() == Some(&FRAME_DELIMITER) => {}
            Ok(Ok(_)) => {
                return Err(TransportError::Closed {
                    port: self.settings.port.clone(),
                })
            }
            Ok(Err(source)) => {
                return Err(TransportError::Read {
                    port: self.settings.port.clone(),
                    source,
                })
            }
            Err(_) => {
                debug!(
                    port = %self.settings.port,
                    timeout_ms = self.settings.read_timeout.as_millis() as u64,
                    partial = %response.escape_ascii(),
                    "read timed out before delimiter"
                );
            }
        }

        trace!(
            port = %self.settings.port,
            response = %response.escape_ascii(),
            "received response"
        );
        Ok(response)
    }

    /// Shut the port down and release it.
    ///
    /// # Errors
    /// Returns [`TransportError::Write`] if the shutdown fails.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.port
            .get_mut()
            .shutdown()
            .await
            .map_err(|source| TransportError::Write {
                port: self.settings.port.clone(),
                source,
            })?;
        debug!(port = %self.settings.port, "serial port closed");
        Ok(())
    }

    /// Discard buffered bytes and anything arriving within the drain window.
    async fn drain_stale_input(&mut self) -> Result<usize, TransportError> {
        let buffered = self.port.buffer().len();
        self.port.consume(buffered);

        let mut discard = [0u8; 256];
        let mut total = buffered;
        let deadline = tokio::time::Instant::now() + self.settings.drain_timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.port.get_mut().read(&mut discard)).await {
                // End-of-stream surfaces on the following read
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => total += n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Ok(Err(source)) => {
                    return Err(TransportError::Read {
                        port: self.settings.port.clone(),
                        source,
                    })
                }
                // Line quiet for the rest of the window
                Err(_) => break,
            }
        }

        Ok(total)
    }
}
