//! Serial port handling
//!
//! Port discovery and opening for the Wi-SUN module's UART or USB bridge.

use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits};
use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::time::Duration;

use super::ProtocolError;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "/dev/serial0")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

impl PortInfo {
    fn unidentified(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

/// Device families a Wi-SUN module shows up as, in listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum PortFamily {
    /// `serialN`: Raspberry Pi alias of the header UART, where HAT modules sit
    PiAlias,
    /// `ttyAMA*`: PL011 UART behind the alias
    Pl011,
    /// `ttyACM*`: CDC-ACM dongles
    UsbAcm,
    /// `ttyUSB*`: USB-serial bridges
    UsbSerial,
    Other,
}

const FAMILY_PREFIXES: [(&str, PortFamily); 4] = [
    ("serial", PortFamily::PiAlias),
    ("ttyAMA", PortFamily::Pl011),
    ("ttyACM", PortFamily::UsbAcm),
    ("ttyUSB", PortFamily::UsbSerial),
];

/// Family and unit number of a device path; unnumbered names sort last
fn classify_port(path: &str) -> (PortFamily, u32) {
    let device = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(path);
    FAMILY_PREFIXES
        .iter()
        .find_map(|&(prefix, family)| {
            let unit = device.strip_prefix(prefix)?.parse().ok()?;
            Some((family, unit))
        })
        .unwrap_or((PortFamily::Other, u32::MAX))
}

/// Ports the module may be attached to: aliases first, then UARTs, then USB
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<(PortFamily, u32, String), PortInfo> = BTreeMap::new();
    let mut add = |info: PortInfo| {
        let (family, unit) = classify_port(&info.name);
        found.entry((family, unit, info.name.clone())).or_insert(info);
    };

    for info in serialport::available_ports().unwrap_or_default() {
        add(PortInfo::from(info));
    }

    // The enumerator skips the udev aliases and sometimes the PL011 node
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        entries
            .flatten()
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|device| classify_port(device).0 != PortFamily::Other)
            .for_each(|device| add(PortInfo::unidentified(format!("/dev/{}", device))));
    }

    found.into_values().collect()
}

/// Open the module's port, 8N1 without flow control
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(name, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(timeout)
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::TransportUnavailable,
            _ => ProtocolError::SerialError(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks that enumeration does not panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_ordering() {
        let mut names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM10",
            "/dev/ttyS0",
            "/dev/serial1",
            "/dev/ttyUSB0",
            "/dev/ttyAMA0",
            "/dev/ttyACM1",
            "/dev/serial0",
        ];
        names.sort_by_key(|name| classify_port(name));

        assert_eq!(
            names,
            vec![
                "/dev/serial0",
                "/dev/serial1",
                "/dev/ttyAMA0",
                "/dev/ttyACM1",
                "/dev/ttyACM10",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyS0",
            ]
        );
    }

    #[test]
    fn test_classify_port() {
        assert_eq!(classify_port("/dev/serial0"), (PortFamily::PiAlias, 0));
        assert_eq!(classify_port("ttyUSB3"), (PortFamily::UsbSerial, 3));
        assert_eq!(classify_port("/dev/serial"), (PortFamily::Other, u32::MAX));
        assert_eq!(classify_port("/dev/ttyACMx"), (PortFamily::Other, u32::MAX));
    }

    #[test]
    fn test_open_missing_port() {
        let result = open_port("/dev/does-not-exist-wisun", 115200, Duration::from_millis(10));
        assert!(result.is_err());
    }
}
