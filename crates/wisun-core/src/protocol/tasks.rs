//! Background receive and send tasks

use crossbeam_channel::{RecvTimeoutError, Sender, TrySendError};
use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Dialect, Inbound, SerialTransport, SetQueue};
use crate::echonet::{Frame, PropertySink};

/// Sink shared between the manager and its receive task
pub(crate) type SinkSlot = Arc<RwLock<Option<Arc<dyn PropertySink>>>>;

/// Hand a decoded frame to the sink, if one is attached
pub(crate) fn put_property(sink: &SinkSlot, frame: &Frame) {
    let sink = sink.read().clone();
    if let Some(sink) = sink {
        let key = frame.get_key();
        sink.put(frame, &key);
    }
}

/// Route one received line: payloads to the sink, everything else to the
/// command session. Malformed payloads are logged and dropped.
pub(crate) fn dispatch_line<D: Dialect>(
    line: &[u8],
    dialect: &D,
    sink: &SinkSlot,
    responses: &Sender<String>,
) {
    match dialect.classify(line) {
        Ok(Inbound::Payload(data)) => match Frame::decode(&data) {
            Ok(frame) => {
                debug!("< {}", frame);
                put_property(sink, &frame);
            }
            Err(e) => warn!("Discarding malformed frame: {}", e),
        },
        Ok(Inbound::Response(text)) => match responses.try_send(text) {
            Ok(()) => {}
            Err(TrySendError::Full(text)) => {
                debug!("Response queue full, dropping '{}'", text)
            }
            Err(TrySendError::Disconnected(_)) => {}
        },
        Ok(Inbound::Ignored) => {}
        Err(e) => warn!("Discarding malformed datagram: {}", e),
    }
}

/// Long-lived reader of the serial line
pub(crate) struct ReceiveTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ReceiveTask {
    pub(crate) fn spawn<D: Dialect>(
        transport: Arc<SerialTransport>,
        dialect: Arc<D>,
        sink: SinkSlot,
        responses: Sender<String>,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("wisun-rx".to_string())
            .spawn(move || {
                info!("receive task start");
                while !stop_flag.load(Ordering::Acquire) {
                    let line = transport.read_line();
                    if line.is_empty() {
                        continue;
                    }
                    dispatch_line(&line, dialect.as_ref(), &sink, &responses);
                }
                info!("receive task end");
            })?;
        Ok(Self { stop, handle })
    }

    /// Signal the loop and wait for it; bounded by the read timeout
    pub(crate) fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            warn!("receive task panicked");
        }
    }
}

/// Periodic transmitter: one queued frame, or the keep-alive, per cycle
pub(crate) struct SendTask {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    queue: Arc<SetQueue>,
}

impl SendTask {
    pub(crate) fn spawn<F>(
        interval: Duration,
        paused: Arc<AtomicBool>,
        send: F,
    ) -> io::Result<Self>
    where
        F: Fn(&Frame) -> bool + Send + 'static,
    {
        let queue = Arc::new(SetQueue::new());
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let task_queue = queue.clone();
        let handle = thread::Builder::new()
            .name("wisun-tx".to_string())
            .spawn(move || {
                info!("send task start");
                let keep_alive = Frame::keep_alive();
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    if paused.load(Ordering::Acquire) {
                        continue;
                    }
                    let queued = task_queue.get_nowait();
                    let frame = queued.as_ref().unwrap_or(&keep_alive);
                    if !send(frame) {
                        warn!("Failed to send {}", frame);
                    }
                }
                info!("send task end");
            })?;
        Ok(Self {
            stop_tx,
            handle,
            queue,
        })
    }

    pub(crate) fn queue(&self) -> &Arc<SetQueue> {
        &self.queue
    }

    /// Interrupt the cycle wait and join; pending frames are discarded
    pub(crate) fn stop(self) {
        let _ = self.stop_tx.try_send(());
        if self.handle.join().is_err() {
            warn!("send task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echonet::{EchonetObject, FrameKey, KEEP_ALIVE_FRAME};
    use crate::protocol::dialect::{Bp35a1, RouteBCredentials};
    use parking_lot::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Frame>>);

    impl PropertySink for Collect {
        fn put(&self, frame: &Frame, _key: &FrameKey) {
            self.0.lock().push(frame.clone());
        }
    }

    fn dialect() -> Bp35a1 {
        Bp35a1::new(RouteBCredentials {
            id: "0".repeat(32),
            password: "0123456789AB".to_string(),
        })
    }

    fn erxudp(payload: &[u8]) -> Vec<u8> {
        format!(
            "ERXUDP FE80:0000:0000:0000:021D:1290:1234:5678 FE80:0000:0000:0000:021D:1290:0000:0001 0E1A 0E1A 001D129012345678 1 {:04X} {}",
            payload.len(),
            hex::encode_upper(payload)
        )
        .into_bytes()
    }

    #[test]
    fn test_malformed_frame_does_not_stop_dispatch() {
        let collect = Arc::new(Collect::default());
        let sink: SinkSlot = Arc::new(RwLock::new(Some(collect.clone() as Arc<dyn PropertySink>)));
        let (tx, rx) = crossbeam_channel::bounded(4);

        // Declares two properties, carries one
        let truncated = &KEEP_ALIVE_FRAME[..14];
        dispatch_line(&erxudp(truncated), &dialect(), &sink, &tx);
        dispatch_line(&erxudp(&KEEP_ALIVE_FRAME), &dialect(), &sink, &tx);
        dispatch_line(b"OK", &dialect(), &sink, &tx);

        let frames = collect.0.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], Frame::keep_alive());
        assert_eq!(rx.try_recv().unwrap(), "OK");
    }

    #[test]
    fn test_response_overflow_is_dropped() {
        let sink: SinkSlot = Arc::new(RwLock::new(None));
        let (tx, rx) = crossbeam_channel::bounded(1);
        dispatch_line(b"EVENT 21", &dialect(), &sink, &tx);
        dispatch_line(b"OK", &dialect(), &sink, &tx);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), "EVENT 21");
    }

    #[test]
    fn test_send_task_idle_sends_keep_alive() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let task = SendTask::spawn(
            Duration::from_millis(30),
            Arc::new(AtomicBool::new(false)),
            move |frame| {
                log.lock().push(frame.encode());
                true
            },
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        task.stop();

        let sent = sent.lock();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|f| f == &KEEP_ALIVE_FRAME.to_vec()));
    }

    #[test]
    fn test_send_task_one_frame_per_cycle() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = sent.clone();
        let paused = Arc::new(AtomicBool::new(true));
        let task = SendTask::spawn(Duration::from_millis(20), paused.clone(), move |frame| {
            log.lock().push(frame.clone());
            true
        })
        .unwrap();

        for codes in [[0xE0u8], [0xD3], [0xE1]] {
            task.queue()
                .put(Frame::get_request(1, EchonetObject::LOW_VOLTAGE_SMART_METER, &codes).unwrap());
        }
        thread::sleep(Duration::from_millis(80));
        assert!(sent.lock().is_empty());
        assert_eq!(task.queue().len(), 3);

        paused.store(false, Ordering::Release);
        let deadline = Instant::now() + Duration::from_secs(2);
        while sent.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();

        let sent = sent.lock();
        let codes: Vec<u8> = sent.iter().take(3).map(|f| f.get_key().codes[0]).collect();
        assert_eq!(codes, vec![0xE0, 0xD3, 0xE1]);
    }

    #[test]
    fn test_send_task_stops_promptly() {
        let task = SendTask::spawn(
            Duration::from_secs(15),
            Arc::new(AtomicBool::new(false)),
            |_| true,
        )
        .unwrap();
        let start = Instant::now();
        task.stop();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
