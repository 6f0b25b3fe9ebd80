//! Error types for bus links

use thiserror::Error;

/// Errors raised by an open (or opening) bus transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Failed to open the transport
    #[error("failed to open {interface}: {reason}")]
    OpenFailed { interface: String, reason: String },

    /// The far end went away (adapter unplugged, stream closed)
    #[error("transport closed")]
    Closed,

    /// The connection handle was torn down and must not be used again
    #[error("connection handle is no longer valid")]
    HandleInvalidated,

    /// Writing a frame failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading from the bus failed
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Frame could not be represented on this transport
    #[error("frame error: {0}")]
    Frame(#[from] eol_protocol::ParseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the channel manager and interface discovery
#[derive(Debug, Error)]
pub enum LinkError {
    /// No transport in the preference list could be opened
    #[error("no CAN transport could be opened (tried: {})", .attempts.join("; "))]
    NoTransport { attempts: Vec<String> },

    /// Failed to enumerate serial ports or network interfaces
    #[error("failed to enumerate interfaces: {0}")]
    EnumerationFailed(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),
}
