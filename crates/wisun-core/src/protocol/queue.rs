//! Outbound request queue with set semantics
//!
//! Frames sharing a key collapse into one entry. The entry keeps its place in
//! line and takes the newest frame's content, so a caller that repeats a
//! request faster than the send task drains cannot grow the queue.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::echonet::{Frame, FrameKey};

#[derive(Default)]
struct Entries {
    order: VecDeque<FrameKey>,
    frames: HashMap<FrameKey, Frame>,
}

impl Entries {
    fn pop(&mut self) -> Option<Frame> {
        while let Some(key) = self.order.pop_front() {
            if let Some(frame) = self.frames.remove(&key) {
                return Some(frame);
            }
        }
        None
    }
}

/// De-duplicating FIFO of outbound frames
#[derive(Default)]
pub struct SetQueue {
    entries: Mutex<Entries>,
    available: Condvar,
}

impl SetQueue {
    /// Empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a frame, replacing a pending frame with the same key
    pub fn put(&self, frame: Frame) {
        let key = frame.get_key();
        let mut entries = self.entries.lock();
        if entries.frames.insert(key.clone(), frame).is_none() {
            entries.order.push_back(key);
        }
        drop(entries);
        self.available.notify_one();
    }

    /// Remove the oldest entry without blocking
    pub fn get_nowait(&self) -> Option<Frame> {
        self.entries.lock().pop()
    }

    /// Remove the oldest entry, waiting up to `timeout` for one to arrive
    pub fn get_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();
        loop {
            if let Some(frame) = entries.pop() {
                return Some(frame);
            }
            if self.available.wait_until(&mut entries, deadline).timed_out() {
                return entries.pop();
            }
        }
    }

    /// Number of distinct keys waiting
    pub fn len(&self) -> usize {
        self.entries.lock().frames.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every pending entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.order.clear();
        entries.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echonet::{EchonetObject, FrameBuilder, ServiceCode};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    fn get(tid: u16, codes: &[u8]) -> Frame {
        Frame::get_request(tid, EchonetObject::LOW_VOLTAGE_SMART_METER, codes).unwrap()
    }

    #[test]
    fn test_same_key_collapses_to_last() {
        let queue = SetQueue::new();
        for tid in 1..=50 {
            queue.put(get(tid, &[0xE0]));
        }
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get_nowait().unwrap().tid(), 50);
        assert!(queue.get_nowait().is_none());
    }

    #[test]
    fn test_fifo_order_kept_on_replace() {
        let queue = SetQueue::new();
        queue.put(get(1, &[0xE0]));
        queue.put(get(2, &[0xE7]));
        queue.put(get(3, &[0xE0]));

        let first = queue.get_nowait().unwrap();
        assert_eq!(first.get_key().codes, vec![0xE0]);
        assert_eq!(first.tid(), 3);
        assert_eq!(queue.get_nowait().unwrap().tid(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_different_objects_do_not_collapse() {
        let queue = SetQueue::new();
        queue.put(get(1, &[0x80]));
        queue.put(
            FrameBuilder::new(ServiceCode::Get)
                .destination(EchonetObject::NODE_PROFILE)
                .property(0x80, &[])
                .build()
                .unwrap(),
        );
        assert_eq!(queue.len(), 2);
        queue.clear();
        assert!(queue.get_nowait().is_none());
    }

    #[test]
    fn test_get_timeout_wakes_on_put() {
        let queue = Arc::new(SetQueue::new());
        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(get(9, &[0xE7]));
        });

        let frame = queue.get_timeout(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(frame.map(|f| f.tid()), Some(9));
        assert!(queue.get_timeout(Duration::from_millis(10)).is_none());
    }
}
