//! Custom error types for the application.
//!
//! Every layer returns a typed failure instead of aborting, so the
//! acquisition loop can decide explicitly whether a failed poll is skipped
//! or ends the run.
//!
//! ## Error Hierarchy
//!
//! - **`DecodeError`**: a response frame that is empty (read timeout), partial,
//!   too short, or carries tokens that are not hex bytes.
//! - **`TransportError`**: the serial link itself failed (port not openable,
//!   write/read failure, device disconnected).
//! - **`StorageError`**: the CSV store could not be opened or written.
//! - **`ConfigError`**: configuration could not be loaded or is invalid.
//! - **`SpceError`**: the umbrella type returned by the instrument client and
//!   the acquisition loop. It wraps the above with `#[from]` and adds the
//!   frame-matching failures (`AddressMismatch`, `Device`).

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, SpceError>;

/// A response frame that cannot be turned into a reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Nothing was received before the read timeout elapsed.
    #[error("empty response (no reply within the read timeout)")]
    Empty,

    /// Bytes arrived but the carriage-return delimiter never did.
    #[error("partial response without delimiter: {raw:?}")]
    Unterminated {
        /// The bytes received so far, lossily decoded.
        raw: String,
    },

    /// The frame has fewer than the four mandatory tokens.
    #[error("expected at least 4 tokens, got {count}: {raw:?}")]
    TooFewTokens {
        /// Number of whitespace-separated tokens found.
        count: usize,
        /// The trimmed response line.
        raw: String,
    },

    /// The address or code token is not a two-digit hex byte.
    #[error("invalid hex in {field} token {token:?}")]
    InvalidHex {
        /// Which positional field failed (`address` or `code`).
        field: &'static str,
        /// The offending token.
        token: String,
    },

    /// A fixed-offset field extends past the end of the response line.
    #[error("response too short for field at offset {offset} (len {len}): {raw:?}")]
    ShortField {
        /// Byte offset of the field.
        offset: usize,
        /// Field width in bytes.
        len: usize,
        /// The trimmed response line.
        raw: String,
    },

    /// The frame carries no descriptive text between code and checksum.
    #[error("response carries no descriptive text: {raw:?}")]
    MissingText {
        /// The trimmed response line.
        raw: String,
    },
}

/// A command that cannot be framed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Payload is empty, non-ASCII, or contains whitespace/control bytes.
    #[error("invalid command payload {0:?}: must be non-empty printable ASCII without spaces")]
    InvalidPayload(String),
}

/// Failure of the physical serial link.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The serial port could not be opened.
    #[error("failed to open serial port '{port}' at {baud_rate} baud: {source}")]
    Open {
        /// Port identifier, e.g. `/dev/ttyUSB0` or `COM5`.
        port: String,
        /// Configured baud rate.
        baud_rate: u32,
        /// Underlying serial error.
        #[source]
        source: tokio_serial::Error,
    },

    /// Writing the request failed.
    #[error("serial write failed on '{port}': {source}")]
    Write {
        /// Port identifier.
        port: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading the response (or draining stale input) failed.
    #[error("serial read failed on '{port}': {source}")]
    Read {
        /// Port identifier.
        port: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The port reported end-of-stream; the device is gone.
    #[error("serial port '{port}' closed (device disconnected)")]
    Closed {
        /// Port identifier.
        port: String,
    },

    /// The blocking open task was cancelled or panicked.
    #[error("serial port task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of the CSV store.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Opening, syncing or inspecting the store failed.
    #[error("store '{path}' I/O error: {source}")]
    Io {
        /// Store path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing or reading a CSV row failed.
    #[error("store '{path}' CSV error: {source}")]
    Csv {
        /// Store path.
        path: PathBuf,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// The store does not start with the `pressure,time` header.
    #[error("store '{path}' has no \"pressure,time\" header")]
    MissingHeader {
        /// Store path.
        path: PathBuf,
    },
}

/// Configuration that could not be loaded or does not make sense.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Parsing or merging the configuration sources failed.
    #[error("configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are logically invalid.
    #[error("configuration validation error: {0}")]
    Invalid(String),
}

/// Umbrella error for the instrument client and acquisition loop.
#[derive(Error, Debug)]
pub enum SpceError {
    /// Command could not be framed.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// Response could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Serial link failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A well-formed frame answered for a different device address.
    #[error("response from address {got:02X} does not match request to {expected:02X}: {raw:?}")]
    AddressMismatch {
        /// Address the request was sent to.
        expected: u8,
        /// Address echoed in the response.
        got: u8,
        /// The trimmed response line.
        raw: String,
    },

    /// The controller answered with a non-OK status token.
    #[error("controller rejected command with status {status:?}: {raw:?}")]
    Device {
        /// Status token reported by the controller.
        status: String,
        /// The trimmed response line.
        raw: String,
    },
}

impl SpceError {
    /// Whether the failure concerns the serial link rather than one reply.
    ///
    /// Transport failures count towards the acquisition loop's halt budget;
    /// everything else only costs the current tick.
    pub fn is_transport(&self) -> bool {
        matches!(self, SpceError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_classified() {
        let err: SpceError = TransportError::Closed {
            port: "COM5".into(),
        }
        .into();
        assert!(err.is_transport());
        assert!(err.to_string().contains("COM5"));
    }

    #[test]
    fn decode_errors_are_not_transport() {
        let err: SpceError = DecodeError::Empty.into();
        assert!(!err.is_transport());

        let err = SpceError::Device {
            status: "ER".into(),
            raw: "05 ER 00 BAD 1F".into(),
        };
        assert!(!err.is_transport());
        assert!(err.to_string().contains("ER"));
    }

    #[test]
    fn address_mismatch_formats_hex() {
        let err = SpceError::AddressMismatch {
            expected: 0x05,
            got: 0x0A,
            raw: "0A OK 00 X 00".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0A"));
        assert!(msg.contains("05"));
    }
}
