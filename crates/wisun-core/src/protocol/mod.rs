//! Wi-SUN Module Link
//!
//! Serial transport, vendor command dialect, send/receive tasks and the
//! connection state machine for a Wi-SUN radio module attached over UART.

pub mod connection;
pub mod dialect;
mod driver;
mod error;
pub mod factory;
mod manager;
mod queue;
pub mod reset;
pub mod serial;
mod session;
pub mod stream;
mod tasks;
mod transport;

pub use connection::{ConnectionState, LinkController, StateCell};
pub use dialect::{Bp35a1, Dialect, Inbound};
pub use driver::WisunDriver;
pub use error::ProtocolError;
pub use factory::{create_driver, create_driver_on_line, probe_driver};
pub use manager::WisunManager;
pub use queue::SetQueue;
pub use reset::{NoReset, ResetLine, SysfsGpio};
pub use serial::{list_ports, open_port, PortInfo};
pub use session::CommandSession;
pub use stream::{LineControl, MemoryLine, SerialChannel, SerialLine};
pub use transport::{SerialTransport, TransportTiming};

/// Default baud rate of the module UART
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Read timeout of the serial line in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Write timeout of the serial line in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2000;

/// Idle wait of reads when no serial line is open
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Width of each reset phase in milliseconds
pub const DEFAULT_RESET_PULSE_MS: u64 = 500;

/// Send task cycle in milliseconds
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 15000;

/// Default wait for a single command response
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Command responses buffered between the receive task and a command session
pub const RESPONSE_QUEUE_DEPTH: usize = 64;

/// Longest line accepted before it is split
pub const MAX_LINE_LEN: usize = 4096;

/// Line delimiter
pub const CR: u8 = b'\r';

/// Ignored on input
pub const LF: u8 = b'\n';
