//! # SPCe DAQ Core Library
//!
//! Client and acquisition loop for the DIGITEL SPCe ion-pump controller. The
//! library holds everything the `spce-daq` binary drives, so tests and other
//! front-ends can reuse the same protocol code.
//!
//! ## Crate Structure
//!
//! - **`hardware`**: the serial protocol stack, bottom-up. `frame` is the pure
//!   ASCII codec, `transport` owns the serial port and performs one bounded
//!   request/response exchange at a time, `spce` exposes typed controller
//!   operations (`identify`, `read_pressure`), and `mock_serial` provides an
//!   in-memory port for tests.
//! - **`acquisition`**: the periodic poll-and-append loop with its stop
//!   handle and failure policy.
//! - **`data`**: the append-only CSV store (`storage`) and its read side
//!   (`series`).
//! - **`config`**: layered configuration (defaults, TOML, environment).
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: the error taxonomy shared by every layer.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
