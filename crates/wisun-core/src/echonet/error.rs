//! Frame errors

use thiserror::Error;

/// Errors produced while building or decoding an Echonet Lite frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Input ended before the declared content
    #[error("Frame truncated: needed {needed} bytes, got {actual}")]
    Truncated {
        /// Bytes the frame declares
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Not an Echonet Lite format 1 frame
    #[error("Invalid frame header: EHD1={ehd1:#04x} EHD2={ehd2:#04x}")]
    InvalidHeader {
        /// First header byte, 0x10 expected
        ehd1: u8,
        /// Second header byte, 0x81 expected
        ehd2: u8,
    },

    /// ESV byte outside the standard set
    #[error("Unknown service code: {0:#04x}")]
    UnknownService(u8),

    /// Bytes left over after the last declared property
    #[error("{0} trailing bytes after last property")]
    TrailingBytes(usize),

    /// PDC cannot hold the value length
    #[error("Property {code:#04x} value too long: {len} bytes")]
    PropertyTooLong {
        /// Property code
        code: u8,
        /// Value length
        len: usize,
    },

    /// OPC cannot hold the property count
    #[error("Too many properties in one list: {0}")]
    TooManyProperties(usize),

    /// Payload is not valid hex text
    #[error("Invalid hex payload")]
    InvalidHex,

    /// Module envelope around the frame could not be parsed
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
}
