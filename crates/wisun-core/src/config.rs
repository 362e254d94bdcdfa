//! Link configuration stored as JSON

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::dialect::{Bp35a1, RouteBCredentials};
use crate::protocol::{
    TransportTiming, DEFAULT_BAUD_RATE, DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_READ_TIMEOUT_MS, DEFAULT_RESET_PULSE_MS, DEFAULT_SEND_INTERVAL_MS,
    DEFAULT_WRITE_TIMEOUT_MS,
};

/// Errors raised while loading a configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Could not read config: {0}")]
    Io(#[from] io::Error),

    /// Not valid JSON for this schema
    #[error("Could not parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Parsed but out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Module family on the serial line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// ROHM BP35A1 `SK` commands
    #[default]
    Bp35a1,
}

/// Serial link and join settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device of the module
    #[serde(default = "default_device")]
    pub device: String,

    /// Line speed; the BP35A1 ships at 115200
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Command set spoken by the module
    #[serde(default)]
    pub dialect: DialectKind,

    /// B-route credentials; required
    pub route_b: RouteBCredentials,

    /// BCM pin wired to the module's reset input; None disables reset.
    /// This is the SoC pin number, not the global sysfs line number; the
    /// chip base is added when the line is exported.
    #[serde(default = "default_reset_gpio")]
    pub reset_gpio: Option<u32>,

    /// Timeouts and periods
    #[serde(default)]
    pub timing: TimingConfig,
}

fn default_device() -> String {
    "/dev/serial0".to_string()
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_reset_gpio() -> Option<u32> {
    Some(18)
}

/// Timeouts and periods, all in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Serial read timeout
    pub read_timeout_ms: u64,
    /// Serial write timeout
    pub write_timeout_ms: u64,
    /// Idle wait of reads while no port is open
    pub poll_interval_ms: u64,
    /// Length of each reset phase, active then inactive
    pub reset_pulse_ms: u64,
    /// Send task cycle
    pub send_interval_ms: u64,
    /// Wait for the answer to a single command
    pub command_timeout_ms: u64,
    /// Wait for the end of one active scan
    pub scan_timeout_ms: u64,
    /// Wait for PANA authentication, and for session termination
    pub join_timeout_ms: u64,
    /// Active scan durations, tried in order
    pub scan_durations: Vec<u8>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            reset_pulse_ms: DEFAULT_RESET_PULSE_MS,
            send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            scan_timeout_ms: 60_000,
            join_timeout_ms: 60_000,
            scan_durations: vec![4, 5, 6],
        }
    }
}

impl LinkConfig {
    /// Defaults around the given credentials
    pub fn new(route_b: RouteBCredentials) -> Self {
        Self {
            device: default_device(),
            baud_rate: default_baud_rate(),
            dialect: DialectKind::default(),
            route_b,
            reset_gpio: default_reset_gpio(),
            timing: TimingConfig::default(),
        }
    }

    /// Load and validate a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse and validate JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject credentials the module cannot take and zero periods
    pub fn validate(&self) -> Result<(), ConfigError> {
        let RouteBCredentials { id, password } = &self.route_b;
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "route_b.id must be non-empty without whitespace".to_string(),
            ));
        }
        if password.is_empty() || password.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "route_b.password must be non-empty without whitespace".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".to_string()));
        }
        if self.timing.send_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.send_interval_ms must be positive".to_string(),
            ));
        }
        if self.timing.scan_durations.is_empty() {
            return Err(ConfigError::Invalid(
                "timing.scan_durations must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Serial timeouts for the transport
    pub fn transport_timing(&self) -> TransportTiming {
        TransportTiming {
            read_timeout: Duration::from_millis(self.timing.read_timeout_ms),
            write_timeout: Duration::from_millis(self.timing.write_timeout_ms),
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms),
            reset_pulse: Duration::from_millis(self.timing.reset_pulse_ms),
        }
    }

    /// Send task cycle
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.timing.send_interval_ms)
    }

    /// Wait for a single command response
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.command_timeout_ms)
    }

    /// BP35A1 dialect configured from these settings
    pub fn bp35a1(&self) -> Bp35a1 {
        Bp35a1::new(self.route_b.clone())
            .with_scan_durations(self.timing.scan_durations.clone())
            .with_scan_timeout(Duration::from_millis(self.timing.scan_timeout_ms))
            .with_join_timeout(Duration::from_millis(self.timing.join_timeout_ms))
    }
}
