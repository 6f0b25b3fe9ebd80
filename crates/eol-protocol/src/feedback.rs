//! Decoding of feedback values reported by the device under test
//!
//! The DUT reports digital states as single bytes and analog measurements as
//! 12-bit ADC codes (big-endian when two bytes wide). Codes are scaled
//! linearly against the bench's analog output range.

use crate::error::DecodeError;
use crate::frame::Frame;

/// Full-scale code of the 12-bit converters on both ends of the loop
pub const FULL_SCALE_CODE: u16 = 4095;

/// Width of an analog feedback value in the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u8", into = "u8")
)]
pub enum ByteLength {
    One,
    Two,
}

impl ByteLength {
    pub fn bytes(self) -> usize {
        match self {
            ByteLength::One => 1,
            ByteLength::Two => 2,
        }
    }
}

impl Default for ByteLength {
    fn default() -> Self {
        ByteLength::Two
    }
}

impl TryFrom<u8> for ByteLength {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ByteLength::One),
            2 => Ok(ByteLength::Two),
            other => Err(DecodeError::UnsupportedWidth(other)),
        }
    }
}

impl From<ByteLength> for u8 {
    fn from(value: ByteLength) -> Self {
        value.bytes() as u8
    }
}

/// Read one payload byte
pub fn read_byte(frame: &Frame, index: usize) -> Result<u8, DecodeError> {
    frame
        .data()
        .get(index)
        .copied()
        .ok_or(DecodeError::IndexOutOfRange {
            index,
            width: 1,
            len: frame.len(),
        })
}

/// Read a raw unsigned code of the given width, big-endian
pub fn read_code(frame: &Frame, index: usize, width: ByteLength) -> Result<u16, DecodeError> {
    let data = frame.data();
    let out_of_range = || DecodeError::IndexOutOfRange {
        index,
        width: width.bytes(),
        len: data.len(),
    };

    match width {
        ByteLength::One => data.get(index).map(|&b| b as u16).ok_or_else(out_of_range),
        ByteLength::Two => {
            let end = index.checked_add(2).ok_or_else(out_of_range)?;
            let bytes = data.get(index..end).ok_or_else(out_of_range)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
        }
    }
}

/// Scale a raw code to volts, rounded to millivolts
pub fn code_to_volts(code: u16, max_voltage: f64) -> f64 {
    round_millivolts(code as f64 / FULL_SCALE_CODE as f64 * max_voltage)
}

/// Scale volts to the nearest lower code, clamped to the converter range
pub fn volts_to_code(volts: f64, max_voltage: f64) -> u16 {
    if max_voltage <= 0.0 || volts <= 0.0 {
        return 0;
    }
    let code = (volts / max_voltage * FULL_SCALE_CODE as f64).floor();
    code.min(FULL_SCALE_CODE as f64) as u16
}

/// Decode a feedback voltage from a frame
pub fn decode_volts(
    frame: &Frame,
    index: usize,
    width: ByteLength,
    max_voltage: f64,
) -> Result<f64, DecodeError> {
    read_code(frame, index, width).map(|code| code_to_volts(code, max_voltage))
}

/// Round to three decimal places
pub fn round_millivolts(volts: f64) -> f64 {
    (volts * 1000.0).round() / 1000.0
}
