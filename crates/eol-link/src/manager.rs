//! Connection lifecycle: open with fallback, health check, teardown
//!
//! The manager is the only owner of the bus connection. It publishes the
//! current [`ConnectionHandle`] on a watch channel; the test runner reads it
//! from there and must check validity before every hardware step.

use std::time::Duration;

use eol_protocol::Frame;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::buffer::FrameBuffer;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::handle::ConnectionHandle;
use crate::listener::Listener;
use crate::slcan::SlcanSerialConnector;
use crate::transport::Connector;

/// Attempts per alternate transport
const ALTERNATE_ATTEMPTS: usize = 2;

/// Result of one health-check cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    /// Existing connection answered the probe
    Healthy { interface: String },
    /// Connection was (re-)established during this cycle
    Reconnected { interface: String },
    /// No transport could be opened
    Down { reason: String },
}

impl LinkStatus {
    pub fn is_connected(&self) -> bool {
        !matches!(self, LinkStatus::Down { .. })
    }

    pub fn interface(&self) -> Option<&str> {
        match self {
            LinkStatus::Healthy { interface } | LinkStatus::Reconnected { interface } => {
                Some(interface.as_str())
            }
            LinkStatus::Down { .. } => None,
        }
    }
}

/// Default preference order: SocketCAN first (Linux builds), then SLCAN serial
pub fn default_connectors(config: &LinkConfig) -> Vec<Box<dyn Connector>> {
    let mut connectors: Vec<Box<dyn Connector>> = Vec::new();
    #[cfg(all(target_os = "linux", feature = "socketcan"))]
    connectors.push(Box::new(crate::can_socket::SocketCanConnector::new(config)));
    connectors.push(Box::new(SlcanSerialConnector::new(config)));
    connectors
}

/// Owns the bus connection and the listener that feeds the frame buffer
pub struct ChannelManager {
    connectors: Vec<Box<dyn Connector>>,
    listener: Listener,
    probe: (u32, Vec<u8>),
    retry_settle: Duration,
    current: Option<ConnectionHandle>,
    next_generation: u64,
    handle_tx: watch::Sender<Option<ConnectionHandle>>,
}

impl ChannelManager {
    /// Create a manager trying `connectors` in order; the first is the primary
    pub fn new(connectors: Vec<Box<dyn Connector>>, config: &LinkConfig, frames: FrameBuffer) -> Self {
        let (handle_tx, _) = watch::channel(None);
        Self {
            connectors,
            listener: Listener::new(frames, config.receive_timeout()),
            probe: (config.probe_id, config.probe_data.clone()),
            retry_settle: config.retry_settle(),
            current: None,
            next_generation: 1,
            handle_tx,
        }
    }

    /// Buffer filled by this manager's listener
    pub fn frames(&self) -> FrameBuffer {
        self.listener.frames().clone()
    }

    /// Receiver that always holds the current handle (or `None`)
    pub fn subscribe(&self) -> watch::Receiver<Option<ConnectionHandle>> {
        self.handle_tx.subscribe()
    }

    pub fn current(&self) -> Option<&ConnectionHandle> {
        self.current.as_ref()
    }

    pub fn listener_running(&self) -> bool {
        self.listener.is_running()
    }

    /// Run the open policy and return a fresh handle.
    ///
    /// The primary gets one attempt. Each alternate gets up to two, each
    /// preceded by its reset hint, with a settle delay after a failure.
    pub async fn connect(&mut self) -> Result<ConnectionHandle, LinkError> {
        let mut attempts = Vec::new();

        for (index, connector) in self.connectors.iter().enumerate() {
            let tries = if index == 0 { 1 } else { ALTERNATE_ATTEMPTS };

            for attempt in 1..=tries {
                if index > 0 {
                    if let Err(e) = connector.reset().await {
                        debug!("Reset hint for {} failed: {}", connector.name(), e);
                    }
                }

                match connector.open().await {
                    Ok(transport) => {
                        let handle = ConnectionHandle::new(self.next_generation, transport);
                        self.next_generation += 1;
                        info!(
                            "Connected to CAN bus via {} (connection #{})",
                            handle.interface(),
                            handle.generation()
                        );
                        return Ok(handle);
                    }
                    Err(e) => {
                        warn!(
                            "Opening {} failed (attempt {}/{}): {}",
                            connector.name(),
                            attempt,
                            tries,
                            e
                        );
                        attempts.push(format!("{}: {}", connector.name(), e));
                        if index > 0 && attempt < tries {
                            tokio::time::sleep(self.retry_settle).await;
                        }
                    }
                }
            }
        }

        error!("No CAN transport available");
        Err(LinkError::NoTransport { attempts })
    }

    /// Send the probe frame. A failed send invalidates and closes the handle.
    pub async fn health_check(&self, handle: &ConnectionHandle) -> bool {
        if !handle.is_valid() {
            return false;
        }

        let (id, data) = &self.probe;
        let result = match Frame::new(*id, data) {
            Ok(frame) => handle.send(&frame).await,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Health check failed on {}: {}",
                    handle.interface(),
                    e
                );
                self.teardown(handle).await;
                false
            }
        }
    }

    /// Invalidate and close a handle. It can never be used again.
    pub async fn teardown(&self, handle: &ConnectionHandle) {
        if handle.invalidate() {
            info!(
                "Tearing down connection #{} on {}",
                handle.generation(),
                handle.interface()
            );
        }
        handle.close().await;
    }

    /// Drop the current connection (if any), connect, arm the listener and
    /// publish the new handle
    pub async fn establish(&mut self) -> Result<ConnectionHandle, LinkError> {
        if let Some(old) = self.current.take() {
            self.teardown(&old).await;
        }

        match self.connect().await {
            Ok(handle) => {
                self.listener.start(&handle);
                self.current = Some(handle.clone());
                self.handle_tx.send_replace(Some(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                self.handle_tx.send_replace(None);
                Err(e)
            }
        }
    }

    /// One health-check cycle: probe the current connection and reconnect
    /// when it is missing, unhealthy or its listener has stopped
    pub async fn maintain(&mut self) -> LinkStatus {
        if let Some(handle) = self.current.clone() {
            if self.health_check(&handle).await {
                if self.listener.is_running() {
                    return LinkStatus::Healthy {
                        interface: handle.interface().to_string(),
                    };
                }
                warn!(
                    "Listener on {} is no longer running; reconnecting",
                    handle.interface()
                );
            }
        }

        match self.establish().await {
            Ok(handle) => LinkStatus::Reconnected {
                interface: handle.interface().to_string(),
            },
            Err(e) => LinkStatus::Down {
                reason: e.to_string(),
            },
        }
    }

    /// Tear down the current connection and publish `None`
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.current.take() {
            self.teardown(&handle).await;
        }
        self.handle_tx.send_replace(None);
    }
}
