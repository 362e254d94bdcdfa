//! Byte stream abstraction for the module's serial line

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A full-duplex byte line to the radio module
pub trait SerialLine: Read + Write + Send {
    /// Set timeout for read/write operations on this handle
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard pending input
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle on the same line
    fn try_clone(&self) -> io::Result<Box<dyn SerialLine>>;
}

/// Serial port wrapper implementing SerialLine
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an open port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl SerialLine for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port
            .set_timeout(timeout)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLine>> {
        let port_clone = self
            .port
            .try_clone()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(Box::new(SerialChannel::new(port_clone)))
    }
}

/// Handle for injecting faults into a [`MemoryLine`] after it has been moved
#[derive(Clone, Default)]
pub struct LineControl {
    stall_writes: Arc<AtomicBool>,
}

impl LineControl {
    /// Make every write on the line fail with `TimedOut`
    pub fn stall_writes(&self, stalled: bool) {
        self.stall_writes.store(stalled, Ordering::SeqCst);
    }
}

/// In-memory serial line; one end of a pair created by [`MemoryLine::pair`]
///
/// Used by demo mode and tests in place of a real port.
pub struct MemoryLine {
    incoming: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
    pending: VecDeque<u8>,
    timeout: Duration,
    control: LineControl,
}

impl MemoryLine {
    /// Create two connected ends: bytes written to one are read from the other
    pub fn pair() -> (MemoryLine, MemoryLine) {
        let (a_tx, a_rx) = crossbeam_channel::unbounded();
        let (b_tx, b_rx) = crossbeam_channel::unbounded();
        (
            MemoryLine::new(b_rx, a_tx),
            MemoryLine::new(a_rx, b_tx),
        )
    }

    fn new(incoming: Receiver<Vec<u8>>, outgoing: Sender<Vec<u8>>) -> Self {
        Self {
            incoming,
            outgoing,
            pending: VecDeque::new(),
            timeout: Duration::from_millis(100),
            control: LineControl::default(),
        }
    }

    /// Fault injection handle shared by all clones of this end
    pub fn control(&self) -> LineControl {
        self.control.clone()
    }
}

impl Read for MemoryLine {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.incoming.recv_timeout(self.timeout) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    // Peer gone: behave like a silent port rather than spinning
                    std::thread::sleep(self.timeout);
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "peer closed"));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.control.stall_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out"));
        }
        self.outgoing
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialLine for MemoryLine {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.pending.clear();
        while self.incoming.try_recv().is_ok() {}
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn SerialLine>> {
        Ok(Box::new(MemoryLine {
            incoming: self.incoming.clone(),
            outgoing: self.outgoing.clone(),
            pending: VecDeque::new(),
            timeout: self.timeout,
            control: self.control.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_line_pair() {
        let (mut host, mut device) = MemoryLine::pair();
        host.write_all(b"SKVER\r").unwrap();

        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"SKV");
        let mut rest = [0u8; 3];
        device.read_exact(&mut rest).unwrap();
        assert_eq!(&rest, b"ER\r");
    }

    #[test]
    fn test_memory_line_read_timeout() {
        let (mut host, _device) = MemoryLine::pair();
        host.set_timeout(Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 1];
        let err = host.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_stalled_writes() {
        let (mut host, _device) = MemoryLine::pair();
        let control = host.control();
        control.stall_writes(true);
        let err = host.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Clones share the control handle
        let mut clone = host.try_clone().unwrap();
        assert!(clone.write(b"x").is_err());
        control.stall_writes(false);
        assert!(clone.write(b"x").is_ok());
    }
}
