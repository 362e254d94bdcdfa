//! Driver construction
//!
//! Opens a manager for the configured dialect and keeps it only when the
//! module answers the probe.

use std::sync::Arc;

use tracing::{error, info};

use super::reset::NoReset;
use super::stream::SerialLine;
use super::{Dialect, SerialTransport, WisunDriver, WisunManager};
use crate::config::{DialectKind, LinkConfig};
use crate::echonet::PropertySink;

/// Open the configured device. `None` when no module answers.
pub fn create_driver(
    config: &LinkConfig,
    sink: Option<Arc<dyn PropertySink>>,
) -> Option<Arc<dyn WisunDriver>> {
    info!(device = %config.device, dialect = ?config.dialect, "Creating driver");
    match config.dialect {
        DialectKind::Bp35a1 => probe_driver(WisunManager::open(config, config.bp35a1()), sink),
    }
}

/// Build a driver on an already open line, without a reset line
pub fn create_driver_on_line(
    config: &LinkConfig,
    line: Box<dyn SerialLine>,
    sink: Option<Arc<dyn PropertySink>>,
) -> Option<Arc<dyn WisunDriver>> {
    let transport = SerialTransport::from_line(line, Box::new(NoReset), config.transport_timing());
    match config.dialect {
        DialectKind::Bp35a1 => probe_driver(
            WisunManager::with_transport(config, transport, config.bp35a1()),
            sink,
        ),
    }
}

/// Attach the sink and probe; a silent module is disposed
pub fn probe_driver<D: Dialect>(
    manager: WisunManager<D>,
    sink: Option<Arc<dyn PropertySink>>,
) -> Option<Arc<dyn WisunDriver>> {
    if let Some(sink) = sink {
        manager.set_property_sink(sink);
    }
    if manager.is_active() {
        Some(Arc::new(manager))
    } else {
        error!("{} did not answer the probe", manager.dialect().name());
        manager.dispose();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::dialect::RouteBCredentials;

    fn config(device: &str) -> LinkConfig {
        let mut config = LinkConfig::new(RouteBCredentials {
            id: "0011".to_string(),
            password: "secret".to_string(),
        });
        config.device = device.to_string();
        config.reset_gpio = None;
        config.timing.poll_interval_ms = 10;
        config.timing.reset_pulse_ms = 1;
        config.timing.command_timeout_ms = 50;
        config
    }

    #[test]
    fn test_missing_device_yields_none() {
        assert!(create_driver(&config("/dev/does-not-exist-wisun"), None).is_none());
    }

    #[test]
    fn test_silent_line_yields_none() {
        let (host, _device) = crate::protocol::MemoryLine::pair();
        let mut config = config("memory");
        config.timing.read_timeout_ms = 20;
        assert!(create_driver_on_line(&config, Box::new(host), None).is_none());
    }
}
