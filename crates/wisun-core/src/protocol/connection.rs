//! Connection management
//!
//! Runs connect and disconnect on a background thread and publishes the
//! lifecycle as an atomic state the foreground can poll without blocking.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use super::WisunDriver;
use crate::echonet::Frame;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not joined
    Disconnected = 0,
    /// Join sequence in progress
    Connecting = 1,
    /// Joined, send task running
    Connected = 2,
    /// Last join failed; retry allowed
    ConnectError = 3,
    /// No usable module. Terminal.
    DeviceError = 4,
    /// Leave sequence in progress
    Disconnecting = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::ConnectError,
            4 => Self::DeviceError,
            5 => Self::Disconnecting,
            _ => Self::Disconnected,
        }
    }

    /// Human-readable name
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::ConnectError => "Connect error",
            Self::DeviceError => "Device error",
            Self::Disconnecting => "Disconnecting",
        }
    }

    /// States from which a connect may be started
    pub fn can_connect(self) -> bool {
        matches!(self, Self::Disconnected | Self::ConnectError)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Shared connection state
#[derive(Debug, Clone)]
pub struct StateCell(Arc<AtomicU8>);

impl StateCell {
    /// Cell holding `state`
    pub fn new(state: ConnectionState) -> Self {
        Self(Arc::new(AtomicU8::new(state as u8)))
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Publish a new state
    pub fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Connection state machine around a driver
pub struct LinkController {
    driver: Option<Arc<dyn WisunDriver>>,
    state: StateCell,
    /// In-flight connect or disconnect
    task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl LinkController {
    /// Without a driver the controller stays in `DeviceError`
    pub fn new(driver: Option<Arc<dyn WisunDriver>>) -> Self {
        let initial = if driver.is_some() {
            ConnectionState::Disconnected
        } else {
            error!("No usable Wi-SUN module");
            ConnectionState::DeviceError
        };
        Self {
            driver,
            state: StateCell::new(initial),
            task: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Current state; never blocks
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Handle for observers on other threads
    pub fn state_cell(&self) -> StateCell {
        self.state.clone()
    }

    /// Driver, unless none could be created
    pub fn driver(&self) -> Option<&Arc<dyn WisunDriver>> {
        self.driver.as_ref()
    }

    /// Whether a connect or disconnect is running
    pub fn is_busy(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start joining in the background. Returns whether a task was launched.
    pub fn start_connect(&self) -> bool {
        let Some(driver) = self.driver.clone() else {
            return false;
        };
        let state = self.state.clone();
        self.launch(
            "wisun-connect",
            ConnectionState::can_connect,
            ConnectionState::Connecting,
            move || {
                let next = if driver.connect() {
                    ConnectionState::Connected
                } else {
                    ConnectionState::ConnectError
                };
                info!("Connect finished: {}", next);
                state.set(next);
            },
        )
    }

    /// Start leaving in the background. Always ends `Disconnected`.
    pub fn start_disconnect(&self) -> bool {
        let Some(driver) = self.driver.clone() else {
            return false;
        };
        let state = self.state.clone();
        self.launch(
            "wisun-disconnect",
            |s| s == ConnectionState::Connected,
            ConnectionState::Disconnecting,
            move || {
                driver.disconnect();
                info!("Disconnect finished");
                state.set(ConnectionState::Disconnected);
            },
        )
    }

    fn launch<F>(
        &self,
        name: &str,
        allowed: impl Fn(ConnectionState) -> bool,
        intermediate: ConnectionState,
        work: F,
    ) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shut_down.load(Ordering::Acquire) {
            return false;
        }

        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("{} ignored, task in flight", name);
            return false;
        }
        let current = self.state.get();
        if !allowed(current) {
            debug!("{} ignored in state {}", name, current);
            return false;
        }
        if let Some(finished) = task.take() {
            let _ = finished.join();
        }

        self.state.set(intermediate);
        match thread::Builder::new().name(name.to_string()).spawn(work) {
            Ok(handle) => {
                *task = Some(handle);
                true
            }
            Err(e) => {
                error!("Could not spawn {}: {}", name, e);
                self.state.set(current);
                false
            }
        }
    }

    /// Join the in-flight task, if any
    pub fn wait_idle(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Connection task panicked");
            }
        }
    }

    /// Connect and wait for the outcome
    pub fn connect(&self) -> bool {
        self.start_connect();
        self.wait_idle();
        self.state() == ConnectionState::Connected
    }

    /// Disconnect and wait for it to finish
    pub fn disconnect(&self) {
        self.start_disconnect();
        self.wait_idle();
    }

    /// Queue a request. False unless a driver with a running send task exists.
    pub fn get(&self, frame: Frame) -> bool {
        self.driver.as_ref().is_some_and(|driver| driver.get(frame))
    }

    /// Pause or resume transmission; the queue is kept
    pub fn send_pause(&self, paused: bool) {
        if let Some(driver) = &self.driver {
            driver.send_pause(paused);
        }
    }

    /// Cancel the in-flight task, leave if joined and dispose the driver.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(driver) = &self.driver else {
            return;
        };
        if self.is_busy() {
            info!("Cancelling {}", self.state.get());
        }
        driver.cancel();
        self.wait_idle();
        if self.state.get() == ConnectionState::Connected {
            self.state.set(ConnectionState::Disconnecting);
            driver.disconnect();
            self.state.set(ConnectionState::Disconnected);
        }
        driver.dispose();
        info!("Link shut down");
    }
}

impl Drop for LinkController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
