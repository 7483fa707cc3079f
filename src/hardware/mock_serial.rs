//! In-memory serial port for exercising the SPCe client without hardware
//!
//! [`MockSerialPort`] implements `AsyncRead` and `AsyncWrite` and is handed to
//! [`TransportSession::from_port`](super::transport::TransportSession::from_port)
//! in place of a real `tokio_serial::SerialStream`. The paired
//! [`MockDeviceHarness`] plays the controller: it receives complete request
//! frames and scripts the replies, including silence (timeouts), partial
//! lines and disconnects.
//!
//! # Example
//!
//! ```rust,no_run
//! use spce_daq::hardware::mock_serial;
//!
//! # async fn example() {
//! let (port, mut device) = mock_serial::new();
//! tokio::spawn(async move {
//!     device.expect_request(b"~ 05 01 00\r").await;
//!     device.reply(b"05 OK 00 DIGITEL SPCe 4C\r");
//! });
//! # drop(port);
//! # }
//! ```

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// How long the harness waits for the client before giving up.
const HARNESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Client side of the mock link.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// Device side of the mock link, driven by the test.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    pending: Vec<u8>,
}

/// Create a connected port/harness pair.
pub fn new() -> (MockSerialPort, MockDeviceHarness) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (reads_tx, reads_rx) = mpsc::unbounded_channel();

    (
        MockSerialPort {
            writes_tx,
            reads_rx,
            read_buffer: VecDeque::new(),
        },
        MockDeviceHarness {
            writes_rx,
            reads_tx,
            pending: Vec::new(),
        },
    )
}

impl MockSerialPort {
    fn fill(&mut self, buf: &mut ReadBuf<'_>) {
        let n = buf.remaining().min(self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..n).collect();
        buf.put_slice(&chunk);
    }
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buffer.is_empty() {
            self.fill(buf);
            return Poll::Ready(Ok(()));
        }

        match self.reads_rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                self.read_buffer.extend(chunk);
                self.fill(buf);
                Poll::Ready(Ok(()))
            }
            // Harness dropped: end-of-stream
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Wait for the next complete request frame (up to and including `\r`).
    ///
    /// Returns `None` if the client dropped the port or nothing arrived
    /// within two seconds.
    pub async fn next_request(&mut self) -> Option<Vec<u8>> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\r') {
                return Some(self.pending.drain(..=pos).collect());
            }
            match tokio::time::timeout(HARNESS_TIMEOUT, self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.pending.extend_from_slice(&chunk),
                Ok(None) | Err(_) => return None,
            }
        }
    }

    /// Wait for a request and assert it equals `expected`.
    ///
    /// # Panics
    /// Panics if no request arrives or it differs from `expected`.
    #[allow(clippy::panic)]
    pub async fn expect_request(&mut self, expected: &[u8]) {
        match self.next_request().await {
            Some(actual) => assert_eq!(
                actual,
                expected,
                "unexpected request: got {:?}, expected {:?}",
                String::from_utf8_lossy(&actual),
                String::from_utf8_lossy(expected)
            ),
            None => panic!(
                "no request arrived, expected {:?}",
                String::from_utf8_lossy(expected)
            ),
        }
    }

    /// Send bytes to the client as if the controller transmitted them.
    ///
    /// Returns `false` if the client side is gone.
    pub fn reply(&self, data: &[u8]) -> bool {
        self.reads_tx.send(data.to_vec()).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_request_framing_across_writes() {
        let (mut port, mut device) = new();
        port.write_all(b"~ 05 ").await.unwrap();
        port.write_all(b"01 00\r~ 05 0B 00\r").await.unwrap();

        assert_eq!(device.next_request().await.unwrap(), b"~ 05 01 00\r");
        assert_eq!(device.next_request().await.unwrap(), b"~ 05 0B 00\r");
    }

    #[tokio::test]
    async fn test_reply_is_readable() {
        let (mut port, device) = new();
        assert!(device.reply(b"05 OK"));

        let mut buf = [0u8; 16];
        let n = port.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"05 OK");
    }

    #[tokio::test]
    async fn test_dropped_harness_breaks_link() {
        let (mut port, device) = new();
        drop(device);

        let err = port.write_all(b"~ 05 01 00\r").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf).await.unwrap(), 0);
    }
}
