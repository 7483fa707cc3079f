//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults (SPCe factory settings)
//! 2. a TOML file (`config/spce.toml` by default; optional)
//! 3. environment variables prefixed `SPCE_DAQ_`, nested keys split on `__`
//!    (e.g. `SPCE_DAQ_SERIAL__PORT=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use spce_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! println!("Polling {} every {} ms", config.serial.port, config.acquisition.poll_interval_ms);
//! # Ok::<(), spce_daq::error::ConfigError>(())
//! ```

use crate::acquisition::AcquisitionSettings;
use crate::error::ConfigError;
use crate::hardware::spce::DEFAULT_ADDRESS;
use crate::hardware::transport::SerialSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/spce.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SPCE_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaqConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the controller
    pub serial: SerialConfig,
    /// Polling cadence and failure budget
    pub acquisition: AcquisitionConfig,
    /// Output store
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM5")
    pub port: String,
    /// Communication speed
    pub baud_rate: u32,
    /// Controller RS-232 address
    pub address: u8,
    /// Maximum wait for a reply, in milliseconds
    pub read_timeout_ms: u64,
    /// Window for discarding stale input before each request, in milliseconds
    pub drain_timeout_ms: u64,
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Tick interval in milliseconds
    pub poll_interval_ms: u64,
    /// Consecutive transport failures tolerated before stopping
    pub max_transport_failures: u32,
    /// Backoff step after a transport failure, in milliseconds
    pub retry_backoff_ms: u64,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// CSV store path
    pub output_path: PathBuf,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_port().to_string(),
            baud_rate: 9600,
            address: DEFAULT_ADDRESS,
            read_timeout_ms: 500,
            drain_timeout_ms: 20,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_transport_failures: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("spce_pressure.csv"),
        }
    }
}

fn default_port() -> &'static str {
    if cfg!(windows) {
        "COM5"
    } else {
        "/dev/ttyUSB0"
    }
}

impl DaqConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] if a source cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    /// Returns [`ConfigError::Load`] if a source cannot be parsed.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::figment(path.as_ref())
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DaqConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.port must not be empty".into()));
        }
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid("serial.baud_rate must be > 0".into()));
        }
        if self.serial.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.read_timeout_ms must be > 0".into(),
            ));
        }
        if self.acquisition.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.poll_interval_ms must be > 0".into(),
            ));
        }
        if self.acquisition.max_transport_failures == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.max_transport_failures must be >= 1".into(),
            ));
        }
        if self.storage.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "storage.output_path must not be empty".into(),
            ));
        }

        Ok(())
    }

    /// Serial line parameters for [`TransportSession::open`](crate::hardware::transport::TransportSession::open).
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings::new(self.serial.port.clone())
            .with_baud_rate(self.serial.baud_rate)
            .with_read_timeout(Duration::from_millis(self.serial.read_timeout_ms))
            .with_drain_timeout(Duration::from_millis(self.serial.drain_timeout_ms))
    }

    /// Loop parameters for [`AcquisitionLoop`](crate::acquisition::AcquisitionLoop).
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            poll_interval: Duration::from_millis(self.acquisition.poll_interval_ms),
            max_transport_failures: self.acquisition.max_transport_failures,
            retry_backoff: Duration::from_millis(self.acquisition.retry_backoff_ms),
        }
    }
}
