//! Demo Mode - Simulated BP35A1 module and smart meter
//!
//! Answers the `SK` command set on the far end of a [`MemoryLine`] and replies
//! to Echonet Lite Get requests with plausible meter readings, so the whole
//! link can run without hardware.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::echonet::meter::{
    EPC_COEFFICIENT, EPC_CUMULATIVE_ENERGY, EPC_EFFECTIVE_DIGITS, EPC_ENERGY_UNIT,
    EPC_INSTANTANEOUS_CURRENT, EPC_INSTANTANEOUS_POWER, EPC_OPERATION_STATUS,
};
use crate::echonet::{EchonetObject, Frame, FrameBuilder, Property, ServiceCode, ECHONET_PORT};
use crate::protocol::dialect::link_local_from_mac;
use crate::protocol::{MemoryLine, SerialLine};

/// MAC address of the simulated meter
pub const DEMO_METER_MAC: &str = "001D129012345678";

/// Address of the simulated module itself
const MODULE_ADDRESS: &str = "FE80:0000:0000:0000:021D:1290:0000:0001";

const CHANNEL: &str = "21";
const PAN_ID: &str = "8A9B";

/// Behavior switches for tests
#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Answer `SKJOIN` with `EVENT 25`, otherwise `EVENT 24`
    pub join_succeeds: bool,
    /// Answer `SKVER`
    pub respond_to_probe: bool,
    /// Fixed seed for reproducible readings
    pub seed: Option<u64>,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            join_succeeds: true,
            respond_to_probe: true,
            seed: None,
        }
    }
}

/// Simulated module running on its own thread
pub struct DemoMeter {
    stop: Arc<AtomicBool>,
    requests: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl DemoMeter {
    /// Serve `line` until stopped
    pub fn spawn(mut line: MemoryLine, options: DemoOptions) -> io::Result<Self> {
        line.set_timeout(Duration::from_millis(50))?;
        let stop = Arc::new(AtomicBool::new(false));
        let requests = Arc::new(AtomicUsize::new(0));

        let mut module = SimulatedModule::new(options, requests.clone());
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("wisun-demo".to_string())
            .spawn(move || {
                info!("Demo meter running");
                let mut buffer = Vec::new();
                let mut chunk = [0u8; 256];
                while !stop_flag.load(Ordering::Acquire) {
                    match line.read(&mut chunk) {
                        Ok(0) => continue,
                        Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            warn!("Demo line read failed: {}", e);
                            continue;
                        }
                    }
                    while let Some(command) = next_command(&mut buffer) {
                        for reply in module.handle(command) {
                            let mut bytes = reply.into_bytes();
                            bytes.extend_from_slice(b"\r\n");
                            if let Err(e) = line.write_all(&bytes) {
                                debug!("Demo reply dropped: {}", e);
                            }
                        }
                    }
                }
                info!("Demo meter stopped");
            })?;

        Ok(Self {
            stop,
            requests,
            handle: Some(handle),
        })
    }

    /// Echonet frames received via `SKSENDTO`
    pub fn requests_served(&self) -> usize {
        self.requests.load(Ordering::Acquire)
    }

    /// Stop answering and join the thread. Idempotent.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DemoMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Command {
    Text(String),
    SendTo(Vec<u8>),
}

/// Split one command off the front of `buffer`.
///
/// `SKSENDTO` carries raw bytes after its header, so it is cut by the
/// declared length instead of at CR.
fn next_command(buffer: &mut Vec<u8>) -> Option<Command> {
    while matches!(buffer.first(), Some(&(b'\r' | b'\n'))) {
        buffer.remove(0);
    }

    if buffer.starts_with(b"SKSENDTO ") {
        // SKSENDTO <handle> <ip> <port> <sec> <len> <data>
        let mut spaces = buffer
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b' ')
            .map(|(i, _)| i);
        let len_start = spaces.nth(4)? + 1;
        let data_start = spaces.next()? + 1;
        let len = std::str::from_utf8(&buffer[len_start..data_start - 1])
            .ok()
            .and_then(|s| usize::from_str_radix(s, 16).ok());
        let Some(len) = len else {
            let end = buffer.iter().position(|&b| b == b'\r')?;
            buffer.drain(..=end);
            return Some(Command::Text("SKSENDTO".to_string()));
        };
        if buffer.len() < data_start + len {
            return None;
        }
        let data = buffer[data_start..data_start + len].to_vec();
        buffer.drain(..data_start + len);
        return Some(Command::SendTo(data));
    }

    let end = buffer.iter().position(|&b| b == b'\r')?;
    let line = String::from_utf8_lossy(&buffer[..end]).trim().to_string();
    buffer.drain(..=end);
    Some(Command::Text(line))
}

struct SimulatedModule {
    options: DemoOptions,
    rng: StdRng,
    meter_address: String,
    joined: bool,
    /// Cumulative energy in 0.1 kWh
    energy: u32,
    requests: Arc<AtomicUsize>,
}

impl SimulatedModule {
    fn new(options: DemoOptions, requests: Arc<AtomicUsize>) -> Self {
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            options,
            rng,
            meter_address: link_local_from_mac(DEMO_METER_MAC).unwrap_or_default(),
            joined: false,
            energy: 123_456,
            requests,
        }
    }

    fn handle(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Text(line) => self.handle_text(&line),
            Command::SendTo(data) => self.handle_send(&data),
        }
    }

    fn handle_text(&mut self, line: &str) -> Vec<String> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or("");
        debug!("demo < {}", name);
        match name {
            "" => Vec::new(),
            "SKVER" if self.options.respond_to_probe => {
                vec!["EVER 1.2.10".to_string(), "OK".to_string()]
            }
            "SKVER" => Vec::new(),
            "SKSETPWD" | "SKSETRBID" | "SKSREG" => vec!["OK".to_string()],
            "SKSCAN" => self.scan(),
            "SKLL64" => match parts.next().and_then(link_local_from_mac) {
                Some(address) => vec![address],
                None => vec!["FAIL ER06".to_string()],
            },
            "SKJOIN" => self.join(),
            "SKTERM" if self.joined => {
                self.joined = false;
                vec!["OK".to_string(), format!("EVENT 27 {}", self.meter_address)]
            }
            "SKTERM" => vec!["FAIL ER10".to_string()],
            _ => vec!["FAIL ER04".to_string()],
        }
    }

    fn scan(&self) -> Vec<String> {
        vec![
            "OK".to_string(),
            format!("EVENT 20 {}", MODULE_ADDRESS),
            "EPANDESC".to_string(),
            format!("  Channel:{}", CHANNEL),
            "  Channel Page:09".to_string(),
            format!("  Pan ID:{}", PAN_ID),
            format!("  Addr:{}", DEMO_METER_MAC),
            "  LQI:E1".to_string(),
            "  PairID:00AABBCC".to_string(),
            format!("EVENT 22 {}", MODULE_ADDRESS),
        ]
    }

    fn join(&mut self) -> Vec<String> {
        let mut replies = vec![
            "OK".to_string(),
            format!("EVENT 21 {} 00", self.meter_address),
            format!("EVENT 02 {}", self.meter_address),
        ];
        self.joined = self.options.join_succeeds;
        if self.joined {
            replies.push(format!("EVENT 25 {}", self.meter_address));
        } else {
            replies.push(format!("EVENT 24 {}", self.meter_address));
        }
        replies
    }

    fn handle_send(&mut self, data: &[u8]) -> Vec<String> {
        self.requests.fetch_add(1, Ordering::AcqRel);
        let mut replies = vec![
            format!("EVENT 21 {} 00", self.meter_address),
            "OK".to_string(),
        ];
        if !self.joined {
            return replies;
        }

        let request = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Demo meter got a malformed frame: {}", e);
                return replies;
            }
        };
        if request.service() != ServiceCode::Get
            || request.destination() != EchonetObject::LOW_VOLTAGE_SMART_METER
        {
            return replies;
        }

        let response = self.respond(&request).encode();
        replies.push(format!(
            "ERXUDP {} {} {:04X} {:04X} {} 1 {:04X} {}",
            self.meter_address,
            MODULE_ADDRESS,
            ECHONET_PORT,
            ECHONET_PORT,
            DEMO_METER_MAC,
            response.len(),
            hex::encode_upper(&response)
        ));
        replies
    }

    fn respond(&mut self, request: &Frame) -> Frame {
        let mut complete = true;
        let properties: Vec<Property> = request
            .properties()
            .iter()
            .map(|p| match self.value(p.code) {
                Some(value) => Property::new(p.code, value),
                None => {
                    complete = false;
                    Property::request(p.code)
                }
            })
            .collect();
        let service = if complete {
            ServiceCode::GetRes
        } else {
            ServiceCode::GetSna
        };

        // Only valid properties go in, so this cannot fail
        FrameBuilder::new(service)
            .tid(request.tid())
            .source(EchonetObject::LOW_VOLTAGE_SMART_METER)
            .destination(request.source())
            .properties(properties)
            .build()
            .unwrap_or_else(|_| Frame::keep_alive())
    }

    fn value(&mut self, code: u8) -> Option<Vec<u8>> {
        match code {
            EPC_OPERATION_STATUS => Some(vec![0x30]),
            EPC_COEFFICIENT => Some(1u32.to_be_bytes().to_vec()),
            EPC_EFFECTIVE_DIGITS => Some(vec![0x06]),
            EPC_ENERGY_UNIT => Some(vec![0x01]),
            EPC_CUMULATIVE_ENERGY => {
                self.energy = self.energy.wrapping_add(self.rng.gen_range(0..3));
                Some(self.energy.to_be_bytes().to_vec())
            }
            EPC_INSTANTANEOUS_POWER => {
                let watts: i32 = self.rng.gen_range(200..3000);
                Some(watts.to_be_bytes().to_vec())
            }
            EPC_INSTANTANEOUS_CURRENT => {
                let r: i16 = self.rng.gen_range(10..150);
                let t: i16 = self.rng.gen_range(10..150);
                let mut value = r.to_be_bytes().to_vec();
                value.extend_from_slice(&t.to_be_bytes());
                Some(value)
            }
            _ => None,
        }
    }
}
