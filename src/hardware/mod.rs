//! SPCe hardware communication
//!
//! Layered bottom-up: `frame` (pure ASCII codec), `transport` (owned serial
//! session), `spce` (typed controller operations), `capabilities` (the
//! trait the acquisition loop polls). `mock_serial` stands in for the port
//! in tests and dry runs.

pub mod capabilities;
pub mod frame;
pub mod mock_serial;
pub mod spce;
pub mod transport;

pub use capabilities::PressureGauge;
pub use spce::{DeviceModel, RawPressure, SpceController};
pub use transport::{SerialSettings, TransportSession};
