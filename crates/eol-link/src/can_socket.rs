//! SocketCAN raw-socket transport (Linux)

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use eol_protocol::Frame;
use socketcan::{
    CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame as SocketCanFrame, Socket, StandardId,
};
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::TransportError;
use crate::scanner::{bring_up_interface, interface_exists};
use crate::transport::{BusTransport, Connector};

/// Raw CAN socket bound to one interface
pub struct SocketCanTransport {
    interface: String,
    socket: Arc<CanSocket>,
    closed: Arc<AtomicBool>,
}

impl SocketCanTransport {
    pub fn open(interface: &str) -> Result<Self, TransportError> {
        let socket = CanSocket::open(interface).map_err(|e| TransportError::OpenFailed {
            interface: interface.to_string(),
            reason: e.to_string(),
        })?;

        // Non-blocking reads are polled from a blocking task
        socket.set_nonblocking(true)?;

        info!("Opened SocketCAN interface {}", interface);
        Ok(Self {
            interface: interface.to_string(),
            socket: Arc::new(socket),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

fn to_socketcan(frame: &Frame) -> Result<CanFrame, TransportError> {
    let invalid = || TransportError::SendFailed(format!("cannot encode frame {}", frame));
    let can_frame = if frame.is_extended() {
        let id = ExtendedId::new(frame.id()).ok_or_else(invalid)?;
        CanFrame::new(id, frame.data())
    } else {
        let id = u16::try_from(frame.id())
            .ok()
            .and_then(StandardId::new)
            .ok_or_else(invalid)?;
        CanFrame::new(id, frame.data())
    };
    can_frame.ok_or_else(invalid)
}

fn from_socketcan(frame: &CanFrame) -> Option<Frame> {
    // Remote and error frames carry no feedback
    if !matches!(frame, CanFrame::Data(_)) {
        return None;
    }
    let id = SocketCanFrame::raw_id(frame);
    let data = EmbeddedFrame::data(frame);
    let parsed = if EmbeddedFrame::is_extended(frame) {
        Frame::extended(id, data)
    } else {
        Frame::new(id, data)
    };
    parsed.ok()
}

#[async_trait]
impl BusTransport for SocketCanTransport {
    fn name(&self) -> &str {
        &self.interface
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let can_frame = to_socketcan(frame)?;
        trace!("{} TX {}", self.interface, frame);
        self.socket
            .write_frame(&can_frame)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let socket = self.socket.clone();
        let closed = self.closed.clone();
        let result = tokio::task::spawn_blocking(move || {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline && !closed.load(Ordering::SeqCst) {
                match socket.read_frame() {
                    Ok(frame) => {
                        if let Some(frame) = from_socketcan(&frame) {
                            return Ok(Some(frame));
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
                }
            }
            Ok(None)
        })
        .await
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

        if let Ok(Some(frame)) = &result {
            trace!("{} RX {}", self.interface, frame);
        }
        result
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed SocketCAN interface {}", self.interface);
        }
    }
}

/// Opens the configured SocketCAN interface, bringing it up first if asked
pub struct SocketCanConnector {
    interface: String,
    bitrate: u32,
    bring_up: bool,
}

impl SocketCanConnector {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            interface: config.socketcan_interface.clone(),
            bitrate: config.bitrate,
            bring_up: config.bring_up_interface,
        }
    }
}

#[async_trait]
impl Connector for SocketCanConnector {
    fn name(&self) -> &str {
        &self.interface
    }

    async fn open(&self) -> Result<Arc<dyn BusTransport>, TransportError> {
        if !interface_exists(&self.interface) {
            return Err(TransportError::OpenFailed {
                interface: self.interface.clone(),
                reason: "interface not present".to_string(),
            });
        }

        if self.bring_up && !bring_up_interface(&self.interface, self.bitrate).await {
            warn!(
                "Continuing with {} as configured by the system",
                self.interface
            );
        }

        let transport = SocketCanTransport::open(&self.interface)?;
        Ok(Arc::new(transport))
    }
}
