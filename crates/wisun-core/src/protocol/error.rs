//! Protocol errors

use thiserror::Error;

use crate::echonet::FrameError;

/// Errors that can occur while talking to the Wi-SUN module
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No serial line is open
    #[error("Serial transport unavailable")]
    TransportUnavailable,

    /// Write did not complete in time
    #[error("Serial write timed out")]
    WriteTimeout,

    /// No matching response before the deadline
    #[error("Timed out waiting for module response")]
    ReadTimeout,

    /// The session was cancelled while waiting
    #[error("Command sequence cancelled")]
    Cancelled,

    /// Received payload is not a valid frame
    #[error("Frame decode error: {0}")]
    Decode(#[from] FrameError),

    /// Join sequence ended without a PANA session
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Module answered `FAIL`
    #[error("Module rejected '{command}': {response}")]
    CommandRejected {
        /// Command name without arguments
        command: String,
        /// The `FAIL ERxx` line
        response: String,
    },

    /// Module missing or silent
    #[error("No usable Wi-SUN module")]
    DeviceError,

    /// Port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// Other I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
