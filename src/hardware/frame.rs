//! DIGITEL SPCe ASCII frame codec
//!
//! Protocol Overview:
//! - Format: ASCII, space separated, NOT SCPI
//! - Request: `~ AA CC PAYLOAD\r` (address, command code, payload; hex)
//! - Response: `AA ST CC DATA... CS\r` (address, status, code, data, checksum)
//! - Terminator: CR only (\r)
//!
//! The codec is pure: it owns no state and never touches the port.
//!
//! # Fixed-width fields
//!
//! Some replies are fixed-width rather than tokenized. The pressure reply
//! carries its value in the 8-byte window starting at byte 9 of the trimmed
//! line, e.g. `05 OK 00 1.23E-04 TORR 3A` yields `1.23E-04`. Use
//! [`ResponseFrame::fixed_field`] with [`PRESSURE_FIELD_OFFSET`] and
//! [`PRESSURE_FIELD_LEN`] for that window; do not tokenize it.

use crate::error::{DecodeError, EncodeError};
use std::fmt;

/// Carriage return; terminates every request and response frame.
pub const FRAME_DELIMITER: u8 = b'\r';

/// Payload sent when a command carries no data.
pub const DEFAULT_PAYLOAD: &str = "00";

/// Start byte offset of the pressure value in a `GetPressure` reply.
pub const PRESSURE_FIELD_OFFSET: usize = 9;

/// Width of the pressure value in a `GetPressure` reply.
pub const PRESSURE_FIELD_LEN: usize = 8;

/// Minimum token count of a well-formed response.
const MIN_TOKENS: usize = 4;

/// Command codes understood by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Get controller model.
    GetModel = 0x01,
    /// Get pressure.
    GetPressure = 0x0B,
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op as u8
    }
}

/// A single request to one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    address: u8,
    opcode: u8,
    payload: String,
}

impl Command {
    /// Command without data (payload `"00"`).
    pub fn new(address: u8, opcode: impl Into<u8>) -> Self {
        Self {
            address,
            opcode: opcode.into(),
            payload: DEFAULT_PAYLOAD.to_string(),
        }
    }

    /// Command carrying `payload`.
    ///
    /// # Errors
    /// Returns [`EncodeError::InvalidPayload`] if the payload is empty or
    /// contains anything other than printable, non-space ASCII.
    pub fn with_payload(
        address: u8,
        opcode: impl Into<u8>,
        payload: impl Into<String>,
    ) -> Result<Self, EncodeError> {
        let payload = payload.into();
        if payload.is_empty() || !payload.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(EncodeError::InvalidPayload(payload));
        }
        Ok(Self {
            address,
            opcode: opcode.into(),
            payload,
        })
    }

    /// Destination address.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Command code.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Data field.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Wire bytes for this command.
    pub fn encode(&self) -> Vec<u8> {
        encode(self.address, self.opcode, &self.payload)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "~ {:02X} {:02X} {}",
            self.address, self.opcode, self.payload
        )
    }
}

/// Frame `payload` for `opcode` at `address`.
///
/// Produces `~ {address:02X} {opcode:02X} {payload}\r`. Callers that accept
/// untrusted payloads should build a [`Command`] with
/// [`Command::with_payload`] instead, which validates it.
pub fn encode(address: u8, opcode: u8, payload: &str) -> Vec<u8> {
    format!("~ {:02X} {:02X} {}\r", address, opcode, payload).into_bytes()
}

/// A decoded response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Address of the answering controller.
    pub address: u8,
    /// Status token, `OK` on success.
    pub status: String,
    /// Code token echoed after the status.
    pub code: u8,
    /// Remaining tokens (data followed by the checksum field).
    pub payload: Vec<String>,
    /// The trimmed response line, kept for fixed-offset fields and logging.
    pub raw: String,
}

impl ResponseFrame {
    /// Whether the controller reported success.
    pub fn is_ok(&self) -> bool {
        self.status == "OK"
    }

    /// Text between the code token and the trailing checksum token.
    ///
    /// For `05 OK 00 DIGITEL SPCe 4C` this is `DIGITEL SPCe`.
    ///
    /// # Errors
    /// Returns [`DecodeError::MissingText`] if there is nothing between them.
    pub fn descriptive_text(&self) -> Result<String, DecodeError> {
        let text = match self.payload.split_last() {
            Some((_checksum, text)) => text.join(" "),
            None => String::new(),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(DecodeError::MissingText {
                raw: self.raw.clone(),
            });
        }
        Ok(text.to_string())
    }

    /// Byte window `[offset, offset + len)` of the trimmed raw line.
    ///
    /// # Errors
    /// Returns [`DecodeError::ShortField`] if the line ends before the window.
    pub fn fixed_field(&self, offset: usize, len: usize) -> Result<&str, DecodeError> {
        self.raw
            .get(offset..offset + len)
            .ok_or_else(|| DecodeError::ShortField {
                offset,
                len,
                raw: self.raw.clone(),
            })
    }
}

/// Decode one response frame.
///
/// The frame must end with the CR delimiter; anything else is a timeout or a
/// partial reply. Non-ASCII bytes are dropped and surrounding whitespace is
/// trimmed before the line is split.
///
/// # Errors
/// Returns a [`DecodeError`] describing why the bytes are not a usable frame.
pub fn decode(raw: &[u8]) -> Result<ResponseFrame, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }
    if raw.last() != Some(&FRAME_DELIMITER) {
        return Err(DecodeError::Unterminated {
            raw: String::from_utf8_lossy(raw).into_owned(),
        });
    }

    let line: String = raw
        .iter()
        .filter(|b| b.is_ascii())
        .map(|&b| b as char)
        .collect();
    let line = line.trim();

    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < MIN_TOKENS {
        return Err(DecodeError::TooFewTokens {
            count: tokens.len(),
            raw: line.to_string(),
        });
    }

    Ok(ResponseFrame {
        address: parse_hex_byte("address", tokens[0])?,
        status: tokens[1].to_string(),
        code: parse_hex_byte("code", tokens[2])?,
        payload: tokens[3..].iter().map(|t| t.to_string()).collect(),
        raw: line.to_string(),
    })
}

/// Parse a token of exactly two hex digits (no sign, no padding).
fn parse_hex_byte(field: &'static str, token: &str) -> Result<u8, DecodeError> {
    let invalid = || DecodeError::InvalidHex {
        field,
        token: token.to_string(),
    };
    if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    u8::from_str_radix(token, 16).map_err(|_| invalid())
}
