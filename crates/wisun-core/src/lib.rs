//! # Wi-SUN Meter Link Core Library
//!
//! Keeps a Wi-SUN B-route session to a low-voltage smart meter alive over a
//! serial radio module and exchanges Echonet Lite frames with it.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Echonet Lite frame encoding and decoding
//! - Serial transport with a GPIO reset line
//! - The BP35A1 `SK` command dialect
//! - Send/receive tasks with a de-duplicating request queue
//! - A connection state machine safe to poll from a foreground loop
//! - A simulated module for demo mode
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wisun_core::prelude::*;
//!
//! let config = LinkConfig::load("wisun.json")?;
//! let store = Arc::new(PropertyStore::new());
//! let controller = LinkController::new(create_driver(&config, Some(store.clone())));
//!
//! if controller.connect() {
//!     controller.get(Frame::get_request(2, EchonetObject::LOW_VOLTAGE_SMART_METER, &[0xE0])?);
//! }
//! ```

pub mod config;
pub mod demo;
pub mod echonet;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigError, LinkConfig, TimingConfig};
    pub use crate::demo::{DemoMeter, DemoOptions};
    pub use crate::echonet::{
        EchonetObject, Frame, FrameBuilder, FrameError, FrameKey, PropertySink, PropertyStore,
        ServiceCode,
    };
    pub use crate::protocol::{
        create_driver, ConnectionState, LinkController, ProtocolError, WisunDriver,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
