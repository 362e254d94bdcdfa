//! Echonet Lite Application Frames
//!
//! Binary frame model exchanged with the smart meter: header, service code
//! and one or two property lists.

mod error;
mod frame;
pub mod meter;
mod store;

pub use error::FrameError;
pub use frame::{
    EchonetObject, Frame, FrameBuilder, FrameKey, Property, ServiceCode, EHD1_ECHONET_LITE,
    EHD2_SPECIFIED, HEADER_LEN, KEEP_ALIVE_FRAME,
};
pub use store::{PropertySink, PropertyStore};

/// UDP port of Echonet Lite
pub const ECHONET_PORT: u16 = 0x0E1A;
