//! Serial transport
//!
//! Owns the module's serial line and reset line. Reads and writes go through
//! separate handles so the receive task never holds up a command write.
//! When the port cannot be opened the transport stays usable in a degraded
//! mode: reads wait one poll interval and return nothing, writes fail.

use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::reset::ResetLine;
use super::serial::open_port;
use super::stream::{SerialChannel, SerialLine};
use super::{
    CR, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RESET_PULSE_MS,
    DEFAULT_WRITE_TIMEOUT_MS, LF, MAX_LINE_LEN,
};

/// Timeouts and pulse widths used by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportTiming {
    /// Longest a single read blocks
    pub read_timeout: Duration,
    /// Longest a single write blocks
    pub write_timeout: Duration,
    /// Idle wait of reads while no port is open
    pub poll_interval: Duration,
    /// Duration of each reset phase (active, then inactive)
    pub reset_pulse: Duration,
}

impl Default for TransportTiming {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reset_pulse: Duration::from_millis(DEFAULT_RESET_PULSE_MS),
        }
    }
}

/// Line-oriented access to the Wi-SUN module
pub struct SerialTransport {
    reader: Mutex<Option<Box<dyn SerialLine>>>,
    writer: Mutex<Option<Box<dyn SerialLine>>>,
    reset_line: Mutex<Option<Box<dyn ResetLine>>>,
    timing: TransportTiming,
}

impl SerialTransport {
    /// Open `device`; failure degrades to the no-transport mode
    pub fn open(
        device: &str,
        baud_rate: u32,
        reset_line: Box<dyn ResetLine>,
        timing: TransportTiming,
    ) -> Self {
        match open_port(device, baud_rate, timing.read_timeout) {
            Ok(port) => {
                info!(device, baud_rate, "Serial port opened");
                Self::from_line(Box::new(SerialChannel::new(port)), reset_line, timing)
            }
            Err(e) => {
                error!(device, "Serial port error: {}", e);
                Self::unavailable(reset_line, timing)
            }
        }
    }

    /// Wrap an already open line
    pub fn from_line(
        mut line: Box<dyn SerialLine>,
        reset_line: Box<dyn ResetLine>,
        timing: TransportTiming,
    ) -> Self {
        let writer = line.try_clone().and_then(|mut w| {
            w.set_timeout(timing.write_timeout)?;
            Ok(w)
        });
        let writer = match writer {
            Ok(w) => w,
            Err(e) => {
                error!("Could not open write handle: {}", e);
                return Self::unavailable(reset_line, timing);
            }
        };
        if let Err(e) = line.set_timeout(timing.read_timeout) {
            warn!("Could not set read timeout: {}", e);
        }

        Self {
            reader: Mutex::new(Some(line)),
            writer: Mutex::new(Some(writer)),
            reset_line: Mutex::new(Some(reset_line)),
            timing,
        }
    }

    /// Transport without a serial line
    pub fn unavailable(reset_line: Box<dyn ResetLine>, timing: TransportTiming) -> Self {
        warn!("Serial transport unavailable, running without a module");
        Self {
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            reset_line: Mutex::new(Some(reset_line)),
            timing,
        }
    }

    /// Whether a serial line is present
    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some()
    }

    /// Timing the transport was opened with
    pub fn timing(&self) -> &TransportTiming {
        &self.timing
    }

    /// Write raw bytes. Returns false on timeout or any other write failure.
    pub fn write_line(&self, data: &[u8]) -> bool {
        let mut guard = self.writer.lock();
        let Some(line) = guard.as_mut() else {
            return false;
        };

        match line.write_all(data).and_then(|_| line.flush()) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                warn!(len = data.len(), "Serial write timed out");
                false
            }
            Err(e) => {
                warn!(len = data.len(), "Serial write failed: {}", e);
                false
            }
        }
    }

    /// Read up to the next CR, dropping LF bytes.
    ///
    /// Returns whatever was read before a timeout; empty without a line.
    pub fn read_line(&self) -> Vec<u8> {
        let mut guard = self.reader.lock();
        let Some(line) = guard.as_mut() else {
            drop(guard);
            thread::sleep(self.timing.poll_interval);
            return Vec::new();
        };

        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match line.read(&mut byte) {
                Ok(0) => return buf,
                Ok(_) => match byte[0] {
                    LF => continue,
                    CR => return buf,
                    b => {
                        buf.push(b);
                        if buf.len() >= MAX_LINE_LEN {
                            warn!("Line exceeds {} bytes, splitting", MAX_LINE_LEN);
                            return buf;
                        }
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if e.kind() != io::ErrorKind::TimedOut {
                        debug!("Serial read error: {}", e);
                    }
                    return buf;
                }
            }
        }
    }

    /// Read exactly `n` bytes, or fewer if the read times out
    pub fn read_exact(&self, n: usize) -> Vec<u8> {
        let mut guard = self.reader.lock();
        let Some(line) = guard.as_mut() else {
            drop(guard);
            thread::sleep(self.timing.poll_interval);
            return Vec::new();
        };

        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            match line.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(count) => filled += count,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        buf.truncate(filled);
        buf
    }

    /// Discard anything buffered on the read side
    pub fn clear_input(&self) {
        if let Some(line) = self.reader.lock().as_mut() {
            if let Err(e) = line.clear_input_buffer() {
                debug!("Could not clear input buffer: {}", e);
            }
        }
    }

    /// Pulse the reset line: active for one pulse, then inactive for one pulse
    pub fn reset(&self) {
        info!("reset()");
        let mut guard = self.reset_line.lock();
        let Some(reset_line) = guard.as_mut() else {
            return;
        };

        if let Err(e) = reset_line.set_active(true) {
            warn!("Could not assert reset line: {}", e);
        }
        thread::sleep(self.timing.reset_pulse);
        if let Err(e) = reset_line.set_active(false) {
            warn!("Could not release reset line: {}", e);
        }
        thread::sleep(self.timing.reset_pulse);
    }

    /// Release the reset line and close the serial line. Idempotent.
    pub fn dispose(&self) {
        if let Some(mut reset_line) = self.reset_line.lock().take() {
            if let Err(e) = reset_line.release() {
                warn!("Could not release reset line: {}", e);
            }
        }
        let writer = self.writer.lock().take();
        let reader = self.reader.lock().take();
        if writer.is_some() || reader.is_some() {
            info!("Serial port closed");
        }
    }
}
