//! Property sink
//!
//! The receive task hands every decoded frame to a [`PropertySink`] together
//! with the frame's key. [`PropertyStore`] keeps the latest value per
//! `(object, code)`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{EchonetObject, Frame, FrameKey};

/// Consumer of decoded inbound frames. Must return quickly.
pub trait PropertySink: Send + Sync {
    /// Accept a decoded frame and its derived key
    fn put(&self, frame: &Frame, key: &FrameKey);
}

/// In-memory property cache
#[derive(Default)]
pub struct PropertyStore {
    values: RwLock<HashMap<(EchonetObject, u8), Vec<u8>>>,
    frames: AtomicU64,
}

impl PropertyStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value of a property, if one was received
    pub fn get(&self, object: EchonetObject, code: u8) -> Option<Vec<u8>> {
        self.values.read().get(&(object, code)).cloned()
    }

    /// Number of distinct properties stored
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether no property has been received
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    /// Number of frames accepted so far
    pub fn frames_received(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl PropertySink for PropertyStore {
    fn put(&self, frame: &Frame, key: &FrameKey) {
        self.frames.fetch_add(1, Ordering::Relaxed);

        // Requests and "not possible" responses carry no values
        let mut values = self.values.write();
        for property in frame
            .properties()
            .iter()
            .chain(frame.get_properties().iter())
        {
            if property.value.is_empty() {
                continue;
            }
            values.insert((key.object, property.code), property.value.clone());
        }
    }
}
