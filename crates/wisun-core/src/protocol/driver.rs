//! Driver capabilities seen by the connection state machine

use std::sync::Arc;

use crate::echonet::{Frame, PropertySink};

/// A Wi-SUN link to one smart meter
///
/// Implementations are shared between the foreground and the connect and
/// disconnect threads, so every method takes `&self`.
pub trait WisunDriver: Send + Sync {
    /// Whether the module answers a version query
    fn is_active(&self) -> bool;

    /// Transmit one frame immediately, bypassing the queue
    fn send_frame(&self, frame: &Frame) -> bool;

    /// Start reading the line; a no-op when already running
    fn start_receive_task(&self);

    /// Stop reading the line and join the thread
    fn stop_receive_task(&self);

    /// Start the periodic send task; a no-op when already running
    fn start_send_task(&self);

    /// Stop the send task; queued requests are discarded
    fn stop_send_task(&self);

    /// Join the meter's PAN and start the send task
    fn connect(&self) -> bool;

    /// Stop the send task and leave the PAN
    fn disconnect(&self);

    /// Abort a join or leave blocked on the module. Later joins fail at once.
    fn cancel(&self) {}

    /// Queue a request for the send task. False when the task is not running.
    fn get(&self, frame: Frame) -> bool;

    /// Suppress transmission without stopping the send task
    fn send_pause(&self, paused: bool);

    /// Route decoded inbound frames to `sink`
    fn set_property_sink(&self, sink: Arc<dyn PropertySink>);

    /// Stop both tasks and release the hardware. Idempotent.
    fn dispose(&self);
}
