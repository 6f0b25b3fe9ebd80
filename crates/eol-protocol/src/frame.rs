//! CAN frame model

use std::fmt;
use std::time::Instant;

use crate::error::ParseError;

/// Largest payload a classic CAN frame can carry
pub const MAX_PAYLOAD: usize = 8;

/// Highest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// A single CAN data frame as observed on (or sent to) the bus.
///
/// The timestamp is the monotonic arrival time on the host. Frames are
/// immutable once built; the correlator relies on the timestamp to tell a
/// fresh confirmation from a stale one.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    extended: bool,
    len: u8,
    data: [u8; MAX_PAYLOAD],
    timestamp: Instant,
}

impl Frame {
    /// Build a frame stamped with the current instant.
    ///
    /// Identifiers above 0x7FF are sent in the extended (29-bit) format.
    pub fn new(id: u32, payload: &[u8]) -> Result<Self, ParseError> {
        Self::build(id, id > MAX_STANDARD_ID, payload)
    }

    /// Build an extended-format frame even for small identifiers
    pub fn extended(id: u32, payload: &[u8]) -> Result<Self, ParseError> {
        Self::build(id, true, payload)
    }

    fn build(id: u32, extended: bool, payload: &[u8]) -> Result<Self, ParseError> {
        let limit = if extended {
            MAX_EXTENDED_ID
        } else {
            MAX_STANDARD_ID
        };
        if id > limit {
            return Err(ParseError::IdOutOfRange(id));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(ParseError::PayloadTooLong(payload.len()));
        }

        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            id,
            extended,
            len: payload.len() as u8,
            data,
            timestamp: Instant::now(),
        })
    }

    /// Replace the arrival timestamp
    pub fn with_timestamp(mut self, timestamp: Instant) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &format_args!("0x{:03X}", self.id))
            .field("extended", &self.extended)
            .field("data", &format_args!("{:02X?}", self.data()))
            .finish()
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "{:08X} [{}]", self.id, self.len)?;
        } else {
            write!(f, "{:03X} [{}]", self.id, self.len)?;
        }
        for byte in self.data() {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Parse a frame identifier written as `0x30`, `0X30` or decimal `48`
pub fn parse_frame_id(text: &str) -> Result<u32, ParseError> {
    let trimmed = text.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };

    let id = parsed.map_err(|_| ParseError::InvalidFrameId(text.to_string()))?;
    if id > MAX_EXTENDED_ID {
        return Err(ParseError::IdOutOfRange(id));
    }
    Ok(id)
}
