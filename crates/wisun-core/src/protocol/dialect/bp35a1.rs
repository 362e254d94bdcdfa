//! ROHM BP35A1 `SK` command dialect
//!
//! The module must be in ASCII receive mode (`WOPT 01`) so that `ERXUDP`
//! payloads arrive hex-encoded on a single line.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Dialect, Inbound};
use crate::echonet::{Frame, FrameError, ECHONET_PORT};
use crate::protocol::{CommandSession, ProtocolError, SerialTransport};

/// PANA authentication failed
const EVENT_PANA_FAILED: u8 = 0x24;
/// PANA authentication succeeded
const EVENT_PANA_ESTABLISHED: u8 = 0x25;
/// Active scan finished
const EVENT_SCAN_DONE: u8 = 0x22;
/// Session terminated by request
const EVENT_SESSION_TERMINATED: u8 = 0x27;
/// Session termination timed out
const EVENT_SESSION_TERM_TIMEOUT: u8 = 0x28;

/// B-route authentication ID and password issued by the utility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteBCredentials {
    /// 32-character authentication ID
    pub id: String,
    /// 12-character password
    pub password: String,
}

/// PAN found by an active scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanDescriptor {
    /// Logical channel, hex
    pub channel: String,
    /// PAN ID, hex
    pub pan_id: String,
    /// MAC address of the coordinator (the meter)
    pub addr: String,
}

#[derive(Default)]
struct PanDescriptorBuilder {
    channel: Option<String>,
    pan_id: Option<String>,
    addr: Option<String>,
}

impl PanDescriptorBuilder {
    fn feed(&mut self, line: &str) {
        let Some((name, value)) = line.trim().split_once(':') else {
            return;
        };
        let value = value.trim().to_string();
        match name {
            "Channel" => self.channel = Some(value),
            "Pan ID" => self.pan_id = Some(value),
            "Addr" => self.addr = Some(value),
            _ => {}
        }
    }

    fn build(self) -> Option<PanDescriptor> {
        Some(PanDescriptor {
            channel: self.channel?,
            pan_id: self.pan_id?,
            addr: self.addr?,
        })
    }
}

/// BP35A1 dialect
pub struct Bp35a1 {
    credentials: RouteBCredentials,
    scan_durations: Vec<u8>,
    scan_timeout: Duration,
    join_timeout: Duration,
    /// Link-local address of the joined meter
    peer: Mutex<Option<String>>,
}

impl Bp35a1 {
    /// Dialect with 60 s scan and join timeouts
    pub fn new(credentials: RouteBCredentials) -> Self {
        Self {
            credentials,
            scan_durations: vec![4, 5, 6],
            scan_timeout: Duration::from_secs(60),
            join_timeout: Duration::from_secs(60),
            peer: Mutex::new(None),
        }
    }

    /// Scan durations tried in order until a PAN is found
    pub fn with_scan_durations(mut self, durations: Vec<u8>) -> Self {
        self.scan_durations = durations;
        self
    }

    /// Wait for the end of each scan
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Wait for PANA authentication and session termination
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Address of the meter after a successful join
    pub fn peer(&self) -> Option<String> {
        self.peer.lock().clone()
    }

    fn expect_ok(&self, session: &CommandSession, command: &str) -> Result<(), ProtocolError> {
        session.send_command(command)?;
        session.wait_for(session.command_timeout(), |line| {
            if line == "OK" {
                Some(Ok(()))
            } else {
                rejection(command, line).map(Err)
            }
        })
    }

    fn scan(&self, session: &CommandSession) -> Result<PanDescriptor, ProtocolError> {
        for &duration in &self.scan_durations {
            info!(duration, "Active scan");
            let command = format!("SKSCAN 2 FFFFFFFF {}", duration);
            session.send_command(&command)?;

            let mut builder = PanDescriptorBuilder::default();
            session.wait_for(self.scan_timeout, |line| {
                if event_code(line) == Some(EVENT_SCAN_DONE) {
                    return Some(Ok(()));
                }
                if let Some(err) = rejection(&command, line) {
                    return Some(Err(err));
                }
                builder.feed(line);
                None
            })?;

            if let Some(pan) = builder.build() {
                info!(channel = %pan.channel, pan_id = %pan.pan_id, addr = %pan.addr, "PAN found");
                return Ok(pan);
            }
        }
        Err(ProtocolError::ConnectFailed("no PAN found".to_string()))
    }

    fn link_local_address(
        &self,
        session: &CommandSession,
        addr: &str,
    ) -> Result<String, ProtocolError> {
        let command = format!("SKLL64 {}", addr);
        session.send_command(&command)?;
        session.wait_for(session.command_timeout(), |line| {
            if is_ipv6(line) {
                Some(Ok(line.to_string()))
            } else {
                rejection(&command, line).map(Err)
            }
        })
    }
}

impl Dialect for Bp35a1 {
    fn name(&self) -> &'static str {
        "BP35A1"
    }

    fn probe(&self, session: &CommandSession) -> bool {
        session.clear_responses();
        if let Err(e) = session.send_command("SKVER") {
            warn!("Probe failed: {}", e);
            return false;
        }
        match session.wait_for(session.command_timeout(), |line| {
            line.strip_prefix("EVER ").map(|v| Ok(v.to_string()))
        }) {
            Ok(version) => {
                info!(version = %version, "BP35A1 detected");
                true
            }
            Err(e) => {
                warn!("Probe failed: {}", e);
                false
            }
        }
    }

    fn join(&self, session: &CommandSession) -> Result<(), ProtocolError> {
        session.clear_responses();
        *self.peer.lock() = None;

        let password = &self.credentials.password;
        self.expect_ok(
            session,
            &format!("SKSETPWD {:X} {}", password.len(), password),
        )?;
        self.expect_ok(session, &format!("SKSETRBID {}", self.credentials.id))?;

        let pan = self.scan(session)?;
        let address = self.link_local_address(session, &pan.addr)?;
        self.expect_ok(session, &format!("SKSREG S2 {}", pan.channel))?;
        self.expect_ok(session, &format!("SKSREG S3 {}", pan.pan_id))?;

        let command = format!("SKJOIN {}", address);
        self.expect_ok(session, &command)?;
        session.wait_for(self.join_timeout, |line| match event_code(line) {
            Some(EVENT_PANA_ESTABLISHED) => Some(Ok(())),
            Some(EVENT_PANA_FAILED) => Some(Err(ProtocolError::ConnectFailed(
                "PANA authentication failed".to_string(),
            ))),
            _ => rejection(&command, line).map(Err),
        })?;

        info!(peer = %address, "PANA session established");
        *self.peer.lock() = Some(address);
        Ok(())
    }

    fn leave(&self, session: &CommandSession) -> Result<(), ProtocolError> {
        session.clear_responses();
        let peer = self.peer.lock().take();
        if peer.is_none() {
            debug!("No session to terminate");
        }

        session.send_command("SKTERM")?;
        session.wait_for(self.join_timeout, |line| match event_code(line) {
            Some(EVENT_SESSION_TERMINATED) => Some(Ok(())),
            Some(EVENT_SESSION_TERM_TIMEOUT) => {
                warn!("Session termination timed out");
                Some(Ok(()))
            }
            // ER10: no session to terminate
            _ if line.starts_with("FAIL ER10") => Some(Ok(())),
            _ => rejection("SKTERM", line).map(Err),
        })
    }

    fn send_frame(&self, transport: &SerialTransport, frame: &Frame) -> bool {
        let Some(peer) = self.peer.lock().clone() else {
            warn!("Not joined, dropping frame {}", frame);
            return false;
        };

        let payload = frame.encode();
        let mut line = format!(
            "SKSENDTO 1 {} {:04X} 1 {:04X} ",
            peer,
            ECHONET_PORT,
            payload.len()
        )
        .into_bytes();
        line.extend_from_slice(&payload);

        debug!("> SKSENDTO {}", frame);
        transport.write_line(&line)
    }

    fn classify(&self, line: &[u8]) -> Result<Inbound, FrameError> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return Ok(Inbound::Ignored);
        }
        if !text.starts_with("ERXUDP ") {
            return Ok(Inbound::Response(text.to_string()));
        }

        // ERXUDP <sender> <dest> <rport> <lport> <mac> <secured> [<side>] <len> <data>
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(FrameError::MalformedEnvelope(format!(
                "ERXUDP with {} fields",
                fields.len()
            )));
        }
        let remote_port = u16::from_str_radix(fields[3], 16)
            .map_err(|_| FrameError::MalformedEnvelope(format!("port '{}'", fields[3])))?;
        if remote_port != ECHONET_PORT {
            debug!(port = remote_port, "Ignoring non-Echonet datagram");
            return Ok(Inbound::Ignored);
        }

        let len_field = fields[fields.len() - 2];
        let declared = usize::from_str_radix(len_field, 16)
            .map_err(|_| FrameError::MalformedEnvelope(format!("length '{}'", len_field)))?;
        let data = hex::decode(fields[fields.len() - 1]).map_err(|_| FrameError::InvalidHex)?;
        if data.len() != declared {
            return Err(FrameError::Truncated {
                needed: declared,
                actual: data.len(),
            });
        }
        Ok(Inbound::Payload(data))
    }
}

/// Event number of an `EVENT xx ...` line
pub(crate) fn event_code(line: &str) -> Option<u8> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "EVENT" {
        return None;
    }
    u8::from_str_radix(parts.next()?, 16).ok()
}

fn rejection(command: &str, line: &str) -> Option<ProtocolError> {
    line.starts_with("FAIL").then(|| ProtocolError::CommandRejected {
        command: command.split(' ').next().unwrap_or(command).to_string(),
        response: line.to_string(),
    })
}

fn is_ipv6(line: &str) -> bool {
    let groups: Vec<&str> = line.split(':').collect();
    groups.len() == 8
        && groups
            .iter()
            .all(|g| g.len() == 4 && g.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Link-local IPv6 address derived from a 64-bit MAC address, as `SKLL64` does
pub fn link_local_from_mac(addr: &str) -> Option<String> {
    let mut bytes = hex::decode(addr).ok()?;
    if bytes.len() != 8 {
        return None;
    }
    bytes[0] ^= 0x02;
    let groups: Vec<String> = bytes
        .chunks(2)
        .map(|pair| format!("{:02X}{:02X}", pair[0], pair[1]))
        .collect();
    Some(format!("FE80:0000:0000:0000:{}", groups.join(":")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dialect() -> Bp35a1 {
        Bp35a1::new(RouteBCredentials {
            id: "00000000000000000000000000000000".to_string(),
            password: "0123456789AB".to_string(),
        })
    }

    #[test]
    fn test_classify_payload() {
        let line = b"ERXUDP FE80:0000:0000:0000:021D:1290:1234:5678 FE80:0000:0000:0000:021D:1290:0000:0001 0E1A 0E1A 001D129012345678 1 0012 1081000102880105FF017201E704000001F4";
        let inbound = dialect().classify(line).unwrap();
        let Inbound::Payload(data) = inbound else {
            panic!("expected payload, got {:?}", inbound);
        };
        assert_eq!(data.len(), 0x12);
        let frame = Frame::decode(&data).unwrap();
        assert_eq!(frame.property(0xE7).unwrap().value, vec![0, 0, 1, 0xF4]);
    }

    #[test]
    fn test_classify_length_mismatch() {
        let line = b"ERXUDP A B 0E1A 0E1A MAC 1 0012 1081";
        assert_eq!(
            dialect().classify(line),
            Err(FrameError::Truncated {
                needed: 0x12,
                actual: 2
            })
        );
    }

    #[test]
    fn test_classify_bad_hex() {
        let line = b"ERXUDP A B 0E1A 0E1A MAC 1 0002 ZZZZ";
        assert_eq!(dialect().classify(line), Err(FrameError::InvalidHex));
    }

    #[test]
    fn test_classify_other_port_ignored() {
        let line = b"ERXUDP A B 02CC 02CC MAC 1 0002 ABCD";
        assert_eq!(dialect().classify(line), Ok(Inbound::Ignored));
    }

    #[test]
    fn test_classify_response() {
        assert_eq!(
            dialect().classify(b"EVENT 25 FE80:0000:0000:0000:021D:1290:1234:5678"),
            Ok(Inbound::Response(
                "EVENT 25 FE80:0000:0000:0000:021D:1290:1234:5678".to_string()
            ))
        );
        assert_eq!(dialect().classify(b"  "), Ok(Inbound::Ignored));
    }

    #[test]
    fn test_event_code() {
        assert_eq!(event_code("EVENT 22 FE80::1"), Some(0x22));
        assert_eq!(event_code("EPANDESC"), None);
        assert_eq!(event_code("EVENT"), None);
    }

    #[test]
    fn test_pan_descriptor_builder() {
        let mut builder = PanDescriptorBuilder::default();
        for line in [
            "EPANDESC",
            "  Channel:21",
            "  Channel Page:09",
            "  Pan ID:8888",
            "  Addr:001D129012345678",
            "  LQI:E1",
        ] {
            builder.feed(line);
        }
        assert_eq!(
            builder.build(),
            Some(PanDescriptor {
                channel: "21".to_string(),
                pan_id: "8888".to_string(),
                addr: "001D129012345678".to_string(),
            })
        );
    }

    #[test]
    fn test_link_local_from_mac() {
        assert_eq!(
            link_local_from_mac("001D129012345678").as_deref(),
            Some("FE80:0000:0000:0000:021D:1290:1234:5678")
        );
        assert!(is_ipv6("FE80:0000:0000:0000:021D:1290:1234:5678"));
        assert!(!is_ipv6("SKLL64 001D129012345678"));
        assert_eq!(link_local_from_mac("0011"), None);
    }

    #[test]
    fn test_rejection() {
        let err = rejection("SKSETRBID 0011", "FAIL ER04").unwrap();
        assert_eq!(
            err.to_string(),
            "Module rejected 'SKSETRBID': FAIL ER04"
        );
        assert!(rejection("SKSETRBID 0011", "OK").is_none());
    }
}
