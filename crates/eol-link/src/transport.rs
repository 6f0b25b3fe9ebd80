//! Bus transport capability
//!
//! A transport is one opened path to the CAN bus: a SocketCAN raw socket, an
//! SLCAN adapter on a serial port, or an in-memory stream to a simulated ECU.
//! The channel manager opens transports through [`Connector`]s and wraps the
//! result in a [`ConnectionHandle`](crate::ConnectionHandle).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eol_protocol::Frame;

use crate::error::TransportError;

/// An open path to the CAN bus
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Human-readable interface name (e.g. `can0`, `/dev/ttyACM0`)
    fn name(&self) -> &str;

    /// Transmit one frame
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Wait up to `timeout` for one inbound frame.
    ///
    /// `Ok(None)` means nothing arrived in time; an error means the
    /// transport is no longer usable.
    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError>;

    /// Release the underlying device. Further calls fail.
    async fn close(&self);
}

/// Opens one kind of transport
#[async_trait]
pub trait Connector: Send + Sync {
    /// Name used in logs and connection errors
    fn name(&self) -> &str;

    /// Nudge the adapter into a known state before an open attempt
    async fn reset(&self) -> Result<(), TransportError> {
        Ok(())
    }

    /// Open the transport
    async fn open(&self) -> Result<Arc<dyn BusTransport>, TransportError>;
}
