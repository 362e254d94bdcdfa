//! Vendor command dialects
//!
//! A dialect knows how to drive one module family: probing it, joining and
//! leaving the meter's PAN, wrapping frames for transmission, and telling
//! payload lines apart from command responses.

mod bp35a1;

pub use bp35a1::{link_local_from_mac, Bp35a1, PanDescriptor, RouteBCredentials};

use crate::echonet::{Frame, FrameError};

use super::{CommandSession, ProtocolError, SerialTransport};

/// A line read from the module, as seen by a dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Echonet Lite payload bytes, not yet decoded
    Payload(Vec<u8>),
    /// Anything addressed to the command session
    Response(String),
    /// Traffic the link does not care about
    Ignored,
}

/// Vendor-specific command set of a Wi-SUN module
pub trait Dialect: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Check that the module answers at all
    fn probe(&self, session: &CommandSession) -> bool;

    /// Run the join sequence; Ok means the PANA session is up
    fn join(&self, session: &CommandSession) -> Result<(), ProtocolError>;

    /// Terminate the session
    fn leave(&self, session: &CommandSession) -> Result<(), ProtocolError>;

    /// Wrap and transmit one frame to the joined meter
    fn send_frame(&self, transport: &SerialTransport, frame: &Frame) -> bool;

    /// Classify one received line
    fn classify(&self, line: &[u8]) -> Result<Inbound, FrameError>;
}
