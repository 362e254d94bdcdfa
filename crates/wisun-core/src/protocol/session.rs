//! Command/response exchange with the module
//!
//! The receive task owns the read side of the line and forwards every
//! non-payload line here; dialects issue commands and wait on that stream.
//! A waiting sequence can be cancelled from another thread.

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{ProtocolError, SerialTransport, CR};

/// Command channel to the module: transport writes plus the response stream
#[derive(Clone)]
pub struct CommandSession {
    transport: Arc<SerialTransport>,
    responses: Receiver<String>,
    command_timeout: Duration,
    cancelled: Arc<AtomicBool>,
    /// Wakes a blocked `wait_for` after `cancel`
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl CommandSession {
    /// Session over `transport`, reading responses forwarded by the receive task
    pub fn new(
        transport: Arc<SerialTransport>,
        responses: Receiver<String>,
        command_timeout: Duration,
    ) -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Self {
            transport,
            responses,
            command_timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    /// Underlying transport
    pub fn transport(&self) -> &SerialTransport {
        &self.transport
    }

    /// Default wait for a single response
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Make the current and every later `wait_for` fail with `Cancelled`
    /// until `resume` is called
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Command session cancelled");
        }
        let _ = self.wake_tx.try_send(());
    }

    /// Accept waits again after `cancel`
    pub fn resume(&self) {
        self.cancelled.store(false, Ordering::Release);
        while self.wake_rx.try_recv().is_ok() {}
    }

    /// Whether `cancel` is in effect
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Drop responses left over from earlier exchanges
    pub fn clear_responses(&self) -> usize {
        let mut dropped = 0;
        while let Ok(line) = self.responses.try_recv() {
            debug!("Discarding stale response: {}", line);
            dropped += 1;
        }
        dropped
    }

    /// Write a command line terminated by CR
    pub fn send_command(&self, command: &str) -> Result<(), ProtocolError> {
        if !self.transport.is_open() {
            return Err(ProtocolError::TransportUnavailable);
        }
        debug!("> {}", redact(command));

        let mut line = Vec::with_capacity(command.len() + 1);
        line.extend_from_slice(command.as_bytes());
        line.push(CR);
        if self.transport.write_line(&line) {
            Ok(())
        } else {
            Err(ProtocolError::WriteTimeout)
        }
    }

    /// Next response line within `timeout`
    pub fn next_response(&self, timeout: Duration) -> Result<String, ProtocolError> {
        match self.responses.recv_timeout(timeout) {
            Ok(line) => {
                debug!("< {}", line);
                Ok(line)
            }
            Err(RecvTimeoutError::Timeout) => Err(ProtocolError::ReadTimeout),
            Err(RecvTimeoutError::Disconnected) => Err(ProtocolError::TransportUnavailable),
        }
    }

    /// Feed responses to `matcher` until it yields a result, `timeout`
    /// passes or the session is cancelled
    pub fn wait_for<T, F>(&self, timeout: Duration, mut matcher: F) -> Result<T, ProtocolError>
    where
        F: FnMut(&str) -> Option<Result<T, ProtocolError>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_cancelled() {
                return Err(ProtocolError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProtocolError::ReadTimeout);
            }
            // None: woken, recheck the cancel flag
            let received = select! {
                recv(self.responses) -> line => line
                    .map(Some)
                    .map_err(|_| ProtocolError::TransportUnavailable),
                recv(self.wake_rx) -> _ => Ok(None),
                default(remaining) => Err(ProtocolError::ReadTimeout),
            };
            let Some(line) = received? else {
                continue;
            };
            debug!("< {}", line);
            if let Some(result) = matcher(&line) {
                return result;
            }
        }
    }
}

/// Hide credentials in logged commands
fn redact(command: &str) -> String {
    let mut parts = command.split(' ');
    match parts.next() {
        Some(name @ "SKSETPWD") => format!("{} ****", name),
        _ => command.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::reset::NoReset;
    use crate::protocol::stream::MemoryLine;
    use crate::protocol::TransportTiming;
    use std::io::Read;

    fn session() -> (CommandSession, crossbeam_channel::Sender<String>, MemoryLine) {
        let (host, device) = MemoryLine::pair();
        let transport = Arc::new(SerialTransport::from_line(
            Box::new(host),
            Box::new(NoReset),
            TransportTiming::default(),
        ));
        let (tx, rx) = crossbeam_channel::bounded(8);
        (
            CommandSession::new(transport, rx, Duration::from_millis(100)),
            tx,
            device,
        )
    }

    #[test]
    fn test_send_command_appends_cr() {
        let (session, _tx, mut device) = session();
        session.send_command("SKVER").unwrap();
        let mut buf = [0u8; 6];
        device.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"SKVER\r");
    }

    #[test]
    fn test_wait_for_skips_unmatched() {
        let (session, tx, _device) = session();
        tx.send("SKVER".to_string()).unwrap();
        tx.send("EVER 1.2.10".to_string()).unwrap();
        let version = session
            .wait_for(Duration::from_millis(100), |line| {
                line.strip_prefix("EVER ").map(|v| Ok(v.to_string()))
            })
            .unwrap();
        assert_eq!(version, "1.2.10");
    }

    #[test]
    fn test_wait_for_times_out() {
        let (session, tx, _device) = session();
        tx.send("OK".to_string()).unwrap();
        let result: Result<(), _> =
            session.wait_for(Duration::from_millis(30), |line| (line == "FAIL").then(|| Ok(())));
        assert!(matches!(result, Err(ProtocolError::ReadTimeout)));
    }

    #[test]
    fn test_cancel_wakes_blocked_wait() {
        let (session, _tx, _device) = session();
        let waiter = session.clone();
        let started = Instant::now();
        let handle = std::thread::spawn(move || {
            waiter.wait_for(Duration::from_secs(10), |_| Some(Ok(())))
        });

        std::thread::sleep(Duration::from_millis(50));
        session.cancel();
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(ProtocolError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_resume_after_cancel() {
        let (session, tx, _device) = session();
        session.cancel();
        tx.send("OK".to_string()).unwrap();
        let result = session.wait_for(Duration::from_millis(50), |line| {
            (line == "OK").then(|| Ok(()))
        });
        assert!(matches!(result, Err(ProtocolError::Cancelled)));

        session.resume();
        assert!(!session.is_cancelled());
        session
            .wait_for(Duration::from_millis(50), |line| (line == "OK").then(|| Ok(())))
            .unwrap();
    }

    #[test]
    fn test_clear_responses() {
        let (session, tx, _device) = session();
        tx.send("EVENT 21".to_string()).unwrap();
        tx.send("OK".to_string()).unwrap();
        assert_eq!(session.clear_responses(), 2);
        assert!(session.next_response(Duration::from_millis(5)).is_err());
    }

    #[test]
    fn test_redact_password() {
        assert_eq!(redact("SKSETPWD C 0123456789AB"), "SKSETPWD ****");
        assert_eq!(redact("SKSETRBID 00112233"), "SKSETRBID 00112233");
    }
}
