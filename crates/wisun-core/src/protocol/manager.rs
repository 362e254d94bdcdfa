//! Wi-SUN link manager
//!
//! Ties a dialect to the serial transport and runs the receive and send
//! tasks. The receive task starts at construction, right after the module
//! reset; the send task runs only while joined.

use crossbeam_channel::Sender;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::reset::{NoReset, ResetLine, SysfsGpio};
use super::tasks::{ReceiveTask, SendTask, SinkSlot};
use super::{CommandSession, Dialect, SerialTransport, WisunDriver, RESPONSE_QUEUE_DEPTH};
use crate::config::LinkConfig;
use crate::echonet::{Frame, PropertySink};

/// Driver implementation for any module dialect
pub struct WisunManager<D: Dialect> {
    dialect: Arc<D>,
    transport: Arc<SerialTransport>,
    session: CommandSession,
    responses_tx: Sender<String>,
    sink: SinkSlot,
    receive_task: Mutex<Option<ReceiveTask>>,
    send_task: Mutex<Option<SendTask>>,
    paused: Arc<AtomicBool>,
    send_interval: Duration,
    disposed: AtomicBool,
}

impl<D: Dialect> WisunManager<D> {
    /// Open the configured serial device and reset line
    pub fn open(config: &LinkConfig, dialect: D) -> Self {
        let reset_line: Box<dyn ResetLine> = match config.reset_gpio {
            Some(pin) => match SysfsGpio::open(pin) {
                Ok(gpio) => Box::new(gpio),
                Err(e) => {
                    warn!(pin, "Reset GPIO unavailable: {}", e);
                    Box::new(NoReset)
                }
            },
            None => Box::new(NoReset),
        };
        let transport = SerialTransport::open(
            &config.device,
            config.baud_rate,
            reset_line,
            config.transport_timing(),
        );
        Self::with_transport(config, transport, dialect)
    }

    /// Build on an existing transport; resets the module and starts receiving
    pub fn with_transport(config: &LinkConfig, transport: SerialTransport, dialect: D) -> Self {
        let transport = Arc::new(transport);
        let (responses_tx, responses_rx) = crossbeam_channel::bounded(RESPONSE_QUEUE_DEPTH);
        let session = CommandSession::new(transport.clone(), responses_rx, config.command_timeout());

        let manager = Self {
            dialect: Arc::new(dialect),
            transport,
            session,
            responses_tx,
            sink: Arc::new(RwLock::new(None)),
            receive_task: Mutex::new(None),
            send_task: Mutex::new(None),
            paused: Arc::new(AtomicBool::new(false)),
            send_interval: config.send_interval(),
            disposed: AtomicBool::new(false),
        };

        manager.transport.reset();
        manager.transport.clear_input();
        manager.start_receive_task();
        manager
    }

    /// Shared serial transport
    pub fn transport(&self) -> &SerialTransport {
        &self.transport
    }

    /// Module dialect
    pub fn dialect(&self) -> &D {
        &self.dialect
    }

    /// Command session used by join and leave
    pub fn session(&self) -> &CommandSession {
        &self.session
    }

    /// Whether the send task is up, i.e. the link is joined
    pub fn is_send_task_running(&self) -> bool {
        self.send_task.lock().is_some()
    }

    /// Requests waiting for the send task
    pub fn pending_requests(&self) -> usize {
        self.send_task
            .lock()
            .as_ref()
            .map_or(0, |task| task.queue().len())
    }
}

impl<D: Dialect> WisunDriver for WisunManager<D> {
    fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && self.dialect.probe(&self.session)
    }

    fn send_frame(&self, frame: &Frame) -> bool {
        self.dialect.send_frame(&self.transport, frame)
    }

    fn start_receive_task(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.receive_task.lock();
        if guard.is_some() {
            return;
        }
        match ReceiveTask::spawn(
            self.transport.clone(),
            self.dialect.clone(),
            self.sink.clone(),
            self.responses_tx.clone(),
        ) {
            Ok(task) => *guard = Some(task),
            Err(e) => error!("Could not start receive task: {}", e),
        }
    }

    fn stop_receive_task(&self) {
        let task = self.receive_task.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }

    fn start_send_task(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.send_task.lock();
        if guard.is_some() {
            return;
        }
        let dialect = self.dialect.clone();
        let transport = self.transport.clone();
        match SendTask::spawn(self.send_interval, self.paused.clone(), move |frame| {
            dialect.send_frame(&transport, frame)
        }) {
            Ok(task) => *guard = Some(task),
            Err(e) => error!("Could not start send task: {}", e),
        }
    }

    fn stop_send_task(&self) {
        let task = self.send_task.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }

    fn connect(&self) -> bool {
        if self.disposed.load(Ordering::Acquire) {
            return false;
        }
        if !self.transport.is_open() {
            warn!("connect(): no serial line");
            return false;
        }

        info!("connect() via {}", self.dialect.name());
        match self.dialect.join(&self.session) {
            Ok(()) => {
                self.start_send_task();
                true
            }
            Err(e) => {
                warn!("Join failed: {}", e);
                false
            }
        }
    }

    fn disconnect(&self) {
        info!("disconnect()");
        self.stop_send_task();
        self.session.resume();
        if let Err(e) = self.dialect.leave(&self.session) {
            warn!("Leave failed: {}", e);
        }
    }

    fn cancel(&self) {
        self.session.cancel();
    }

    fn get(&self, frame: Frame) -> bool {
        match self.send_task.lock().as_ref() {
            Some(task) => {
                task.queue().put(frame);
                true
            }
            None => false,
        }
    }

    fn send_pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    fn set_property_sink(&self, sink: Arc<dyn PropertySink>) {
        *self.sink.write() = Some(sink);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("dispose()");
        self.session.cancel();
        self.stop_send_task();
        self.stop_receive_task();
        self.transport.dispose();
    }
}

impl<D: Dialect> Drop for WisunManager<D> {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echonet::{EchonetObject, PropertyStore, KEEP_ALIVE_FRAME};
    use crate::protocol::dialect::{Bp35a1, RouteBCredentials};
    use crate::protocol::stream::MemoryLine;
    use std::io::Write;
    use std::thread;
    use std::time::Instant;

    fn config() -> LinkConfig {
        let mut config = LinkConfig::new(RouteBCredentials {
            id: "00112233445566778899AABBCCDDEEFF".to_string(),
            password: "0123456789AB".to_string(),
        });
        config.reset_gpio = None;
        config.timing.read_timeout_ms = 20;
        config.timing.write_timeout_ms = 20;
        config.timing.poll_interval_ms = 10;
        config.timing.reset_pulse_ms = 1;
        config.timing.command_timeout_ms = 50;
        config
    }

    fn manager() -> (WisunManager<Bp35a1>, MemoryLine) {
        let config = config();
        let (host, device) = MemoryLine::pair();
        let transport =
            SerialTransport::from_line(Box::new(host), Box::new(NoReset), config.transport_timing());
        let dialect = config.bp35a1();
        (WisunManager::with_transport(&config, transport, dialect), device)
    }

    #[test]
    fn test_get_requires_send_task() {
        let (manager, _device) = manager();
        assert!(!manager.is_send_task_running());
        assert!(!manager.get(Frame::keep_alive()));
        assert_eq!(manager.pending_requests(), 0);

        manager.send_pause(true);
        manager.start_send_task();
        assert!(manager.get(Frame::keep_alive()));
        assert_eq!(manager.pending_requests(), 1);

        manager.stop_send_task();
        assert!(!manager.get(Frame::keep_alive()));
    }

    #[test]
    fn test_receive_task_feeds_sink() {
        let (manager, mut device) = manager();
        let store = Arc::new(PropertyStore::new());
        manager.set_property_sink(store.clone());

        let response = crate::echonet::FrameBuilder::new(crate::echonet::ServiceCode::GetRes)
            .tid(1)
            .source(EchonetObject::LOW_VOLTAGE_SMART_METER)
            .destination(EchonetObject::CONTROLLER)
            .property(0xE7, &[0x00, 0x00, 0x01, 0xF4])
            .build()
            .unwrap()
            .encode();
        let line = format!(
            "ERXUDP FE80:0000:0000:0000:021D:1290:1234:5678 FE80:0000:0000:0000:021D:1290:0000:0001 0E1A 0E1A 001D129012345678 1 {:04X} {}\r\n",
            response.len(),
            hex::encode_upper(&response)
        );
        device.write_all(line.as_bytes()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while store.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(
            store.get(EchonetObject::LOW_VOLTAGE_SMART_METER, 0xE7),
            Some(vec![0x00, 0x00, 0x01, 0xF4])
        );
    }

    #[test]
    fn test_send_frame_requires_join() {
        let (manager, _device) = manager();
        assert!(!manager.send_frame(&Frame::decode(&KEEP_ALIVE_FRAME).unwrap()));
    }

    #[test]
    fn test_probe_times_out_without_module() {
        let (manager, _device) = manager();
        assert!(!manager.is_active());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let (manager, _device) = manager();
        manager.dispose();
        manager.dispose();
        assert!(!manager.transport().is_open());
        assert!(!manager.connect());
        manager.start_send_task();
        assert!(!manager.is_send_task_running());
    }

    #[test]
    fn test_connect_without_line_fails() {
        let config = config();
        let transport = SerialTransport::unavailable(Box::new(NoReset), config.transport_timing());
        let manager = WisunManager::with_transport(&config, transport, config.bp35a1());
        assert!(!manager.connect());
        assert!(!manager.is_active());
    }
}
