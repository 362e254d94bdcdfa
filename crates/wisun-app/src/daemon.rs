//! Foreground loop
//!
//! Polls the connection state, starts connects, retries after join failures
//! and queues the periodic property requests. Never blocks on the link.

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use wisun_core::echonet::{EchonetObject, Frame};
use wisun_core::protocol::{ConnectionState, LinkController};

use crate::config::DaemonConfig;

pub struct Daemon {
    controller: LinkController,
    auto_connect: bool,
    retry_interval: Duration,
    poll_interval: Duration,
    poll_codes: Vec<u8>,
    last_state: Option<ConnectionState>,
    next_retry: Instant,
    next_poll: Instant,
    tid: u16,
}

impl Daemon {
    pub fn new(controller: LinkController, config: &DaemonConfig) -> Result<Self> {
        let now = Instant::now();
        Ok(Self {
            controller,
            auto_connect: config.auto_connect,
            retry_interval: config.retry_interval(),
            poll_interval: config.poll_interval(),
            poll_codes: config.poll_codes()?,
            last_state: None,
            next_retry: now,
            next_poll: now,
            // TID 1 belongs to the keep-alive
            tid: 1,
        })
    }

    pub fn controller(&self) -> &LinkController {
        &self.controller
    }

    /// Run one step of the loop at time `now`
    pub fn tick(&mut self, now: Instant) {
        let state = self.controller.state();
        if self.last_state != Some(state) {
            self.on_transition(state, now);
            self.last_state = Some(state);
        }

        match state {
            ConnectionState::Disconnected if self.auto_connect => {
                self.controller.start_connect();
            }
            ConnectionState::ConnectError if now >= self.next_retry => {
                info!("Retrying connect");
                self.controller.start_connect();
            }
            ConnectionState::Connected if now >= self.next_poll => {
                self.poll(now);
            }
            _ => {}
        }
    }

    fn on_transition(&mut self, state: ConnectionState, now: Instant) {
        match state {
            ConnectionState::DeviceError => error!("Link state: {}", state),
            ConnectionState::ConnectError => {
                warn!(
                    "Link state: {}, retrying in {}s",
                    state,
                    self.retry_interval.as_secs()
                );
                self.next_retry = now + self.retry_interval;
            }
            ConnectionState::Connected => {
                info!("Link state: {}", state);
                self.next_poll = now;
            }
            _ => info!("Link state: {}", state),
        }
    }

    fn poll(&mut self, now: Instant) {
        self.next_poll = now + self.poll_interval;
        if self.poll_codes.is_empty() {
            return;
        }

        self.tid = self.tid.wrapping_add(1).max(2);
        match Frame::get_request(
            self.tid,
            EchonetObject::LOW_VOLTAGE_SMART_METER,
            &self.poll_codes,
        ) {
            Ok(frame) => {
                if !self.controller.get(frame) {
                    warn!("Poll request not queued");
                }
            }
            Err(e) => error!("Could not build poll request: {}", e),
        }
    }

    /// Tick every `period` until a shutdown request arrives
    pub fn run(&mut self, shutdown: &Receiver<()>, period: Duration) {
        loop {
            self.tick(Instant::now());
            match shutdown.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) => {
                    info!("Shutdown requested");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    pub fn shutdown(&self) {
        self.controller.shutdown();
    }
}
