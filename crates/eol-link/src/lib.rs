//! EOL Link
//!
//! Everything between the test runner and the CAN bus.
//!
//! # Architecture
//!
//! ```text
//! Connector (SocketCAN / SLCAN / virtual)
//!     │ open()
//!     ▼
//! ChannelManager ──► ConnectionHandle ──► Listener ──► FrameBuffer
//!     │ health_check / maintain                         │
//!     ▼                                                 ▼
//! watch::Receiver<Option<ConnectionHandle>>      await_fresh()
//! ```
//!
//! The manager owns the connection lifecycle and is the only component that
//! opens or tears down transports. The listener is the only writer of the
//! frame buffer. The correlator reads the buffer to find a confirmation frame
//! that arrived after a hardware action.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use eol_link::{await_fresh, default_connectors, ChannelManager, FrameBuffer, LinkConfig};
//!
//! # async fn demo() -> Result<(), eol_link::LinkError> {
//! let config = LinkConfig::default();
//! let mut manager = ChannelManager::new(default_connectors(&config), &config, FrameBuffer::new());
//! manager.establish().await?;
//!
//! let feedback = await_fresh(&manager.frames(), 0x30, Duration::from_millis(500)).await;
//! println!("relay feedback: {:?}", feedback);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
#[cfg(all(target_os = "linux", feature = "socketcan"))]
pub mod can_socket;
pub mod config;
pub mod correlator;
pub mod error;
pub mod handle;
pub mod listener;
pub mod manager;
pub mod scanner;
pub mod slcan;
pub mod transport;
pub mod usb_ids;

pub use buffer::{FrameBuffer, FRAME_BUFFER_CAPACITY};
pub use config::LinkConfig;
pub use correlator::{await_fresh, POLL_INTERVAL};
pub use error::{LinkError, TransportError};
pub use handle::ConnectionHandle;
pub use listener::Listener;
pub use manager::{default_connectors, ChannelManager, LinkStatus};
pub use scanner::{list_can_interfaces, PortScanner, SerialPortInfo};
pub use slcan::{SlcanSerialConnector, SlcanTransport};
pub use transport::{BusTransport, Connector};
