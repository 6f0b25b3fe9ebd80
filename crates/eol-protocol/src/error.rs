//! Error types for frame parsing and feedback decoding

use thiserror::Error;

/// Errors that can occur while building or parsing frames
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid SLCAN line structure
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Non-hexadecimal characters where hex digits were expected
    #[error("invalid hex field: {0}")]
    InvalidHex(String),

    /// CAN payloads carry at most 8 bytes
    #[error("payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),

    /// Identifier does not fit an 11-bit or 29-bit CAN id
    #[error("frame id out of range: 0x{0:X}")]
    IdOutOfRange(u32),

    /// Identifier text could not be parsed
    #[error("invalid frame id: {0:?}")]
    InvalidFrameId(String),

    /// Bitrate has no SLCAN `Sn` setup command
    #[error("unsupported bitrate: {0} bit/s")]
    UnsupportedBitrate(u32),
}

/// Errors raised when a feedback payload cannot be decoded
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The configured byte range lies outside the received payload
    #[error("byte index {index} (+{width}) out of range for {len}-byte payload")]
    IndexOutOfRange {
        index: usize,
        width: usize,
        len: usize,
    },

    /// Only 1- and 2-byte feedback values are defined
    #[error("unsupported feedback width: {0} bytes")]
    UnsupportedWidth(u8),
}
