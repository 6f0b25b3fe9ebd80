//! Connection handles

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eol_protocol::Frame;

use crate::error::TransportError;
use crate::transport::BusTransport;

struct HandleInner {
    generation: u64,
    transport: Arc<dyn BusTransport>,
    valid: AtomicBool,
}

/// A live bus connection issued by the [`ChannelManager`](crate::ChannelManager).
///
/// Clones refer to the same connection. Once the manager tears a handle down
/// it stays invalid forever; every operation on it fails and a reconnect
/// yields a handle with a new generation number.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<HandleInner>,
}

impl ConnectionHandle {
    pub(crate) fn new(generation: u64, transport: Arc<dyn BusTransport>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                generation,
                transport,
                valid: AtomicBool::new(true),
            }),
        }
    }

    /// Monotonic connection counter, unique per handle
    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    /// Name of the interface this handle is bound to
    pub fn interface(&self) -> &str {
        self.inner.transport.name()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    pub async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if !self.is_valid() {
            return Err(TransportError::HandleInvalidated);
        }
        self.inner.transport.send(frame).await
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if !self.is_valid() {
            return Err(TransportError::HandleInvalidated);
        }
        self.inner.transport.receive(timeout).await
    }

    /// Mark the handle dead. Returns `false` if it already was.
    pub(crate) fn invalidate(&self) -> bool {
        self.inner.valid.swap(false, Ordering::SeqCst)
    }

    pub(crate) async fn close(&self) {
        self.inner.transport.close().await;
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("generation", &self.generation())
            .field("interface", &self.interface())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ConnectionHandle {}
