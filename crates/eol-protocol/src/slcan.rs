//! SLCAN (Lawicel ASCII) framing used by USB-CAN serial adapters
//!
//! Frames travel as carriage-return terminated lines:
//! - `t` + 3 hex id + 1 hex length + data, e.g. `t0302AA55\r`
//! - `T` + 8 hex id + 1 hex length + data for extended ids
//!
//! Adapters answer setup commands with a bare `\r` (ok) or BEL (0x07, error)
//! and may confirm transmissions with `z\r` / `Z\r`. A trailing 4-digit
//! timestamp on received frames is accepted and ignored; the host stamps
//! frames on arrival.

use tracing::warn;

use crate::error::ParseError;
use crate::frame::{Frame, MAX_PAYLOAD};

/// Maximum line length: `T` + 8 id + 1 len + 16 data + 4 timestamp
const MAX_LINE_LEN: usize = 30;

const BELL: u8 = 0x07;
const CR: u8 = b'\r';

/// Open the CAN channel
pub const OPEN_COMMAND: &[u8] = b"O\r";

/// Close the CAN channel. Also used to bring a confused adapter back to a
/// known state before reopening.
pub const CLOSE_COMMAND: &[u8] = b"C\r";

/// A decoded unit from an SLCAN byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlcanMessage {
    /// A data frame
    Frame(Frame),
    /// Empty line: command accepted
    Ack,
    /// BEL: command rejected
    Bell,
    /// `z` / `Z`: transmission confirmed
    TransmitAck,
    /// Any other line (setup commands such as `O`, `C`, `S6`, version replies)
    Command(String),
}

/// Streaming SLCAN parser
#[derive(Debug, Default)]
pub struct SlcanCodec {
    buffer: Vec<u8>,
}

impl SlcanCodec {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Append raw bytes from the wire
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Only the unterminated tail is bounded; complete lines wait for next_message
        let tail_start = self
            .buffer
            .iter()
            .rposition(|&b| b == CR || b == BELL)
            .map_or(0, |i| i + 1);
        if self.buffer.len() - tail_start > MAX_LINE_LEN {
            let keep_from = self.buffer.len() - MAX_LINE_LEN;
            self.buffer.drain(tail_start..keep_from);
        }
    }

    /// Pop the next complete message, skipping malformed frame lines
    pub fn next_message(&mut self) -> Option<SlcanMessage> {
        loop {
            if self.buffer.first() == Some(&BELL) {
                self.buffer.remove(0);
                return Some(SlcanMessage::Bell);
            }

            let end = self.buffer.iter().position(|&b| b == CR || b == BELL)?;
            if self.buffer[end] == BELL {
                // Garbage followed by an error marker; drop the garbage
                self.buffer.drain(..end);
                continue;
            }

            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line[..end]).into_owned();

            match line.as_bytes().first() {
                None => return Some(SlcanMessage::Ack),
                Some(b'z') | Some(b'Z') if line.len() == 1 => {
                    return Some(SlcanMessage::TransmitAck)
                }
                Some(b't') | Some(b'T') => match parse_frame_line(&line) {
                    Ok(frame) => return Some(SlcanMessage::Frame(frame)),
                    Err(e) => {
                        warn!("Dropping malformed SLCAN line {:?}: {}", line, e);
                        continue;
                    }
                },
                Some(_) => return Some(SlcanMessage::Command(line)),
            }
        }
    }

    /// Clear the internal buffer
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Parse one `t...` / `T...` line (without the terminator)
pub fn parse_frame_line(line: &str) -> Result<Frame, ParseError> {
    let (extended, id_len) = match line.as_bytes().first() {
        Some(b't') => (false, 3),
        Some(b'T') => (true, 8),
        _ => return Err(ParseError::InvalidFrame(line.to_string())),
    };

    let body = &line[1..];
    if body.len() < id_len + 1 || !body.is_ascii() {
        return Err(ParseError::InvalidFrame(line.to_string()));
    }

    let id = u32::from_str_radix(&body[..id_len], 16)
        .map_err(|_| ParseError::InvalidHex(body[..id_len].to_string()))?;
    let len = usize::from_str_radix(&body[id_len..id_len + 1], 16)
        .map_err(|_| ParseError::InvalidHex(body[id_len..id_len + 1].to_string()))?;
    if len > MAX_PAYLOAD {
        return Err(ParseError::PayloadTooLong(len));
    }

    let data_hex = &body[id_len + 1..];
    // Optional 4-digit adapter timestamp after the data
    if data_hex.len() != len * 2 && data_hex.len() != len * 2 + 4 {
        return Err(ParseError::InvalidFrame(line.to_string()));
    }

    let mut payload = Vec::with_capacity(len);
    for i in 0..len {
        let pair = &data_hex[i * 2..i * 2 + 2];
        let byte =
            u8::from_str_radix(pair, 16).map_err(|_| ParseError::InvalidHex(pair.to_string()))?;
        payload.push(byte);
    }

    if extended {
        Frame::extended(id, &payload)
    } else {
        Frame::new(id, &payload)
    }
}

/// Encode a frame as an SLCAN transmit line
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut line = if frame.is_extended() {
        format!("T{:08X}{:X}", frame.id(), frame.len())
    } else {
        format!("t{:03X}{:X}", frame.id(), frame.len())
    };
    for byte in frame.data() {
        line.push_str(&format!("{:02X}", byte));
    }
    line.push('\r');
    line.into_bytes()
}

/// The `Sn` setup command selecting a standard bitrate
pub fn bitrate_command(bitrate: u32) -> Result<Vec<u8>, ParseError> {
    let code = match bitrate {
        10_000 => '0',
        20_000 => '1',
        50_000 => '2',
        100_000 => '3',
        125_000 => '4',
        250_000 => '5',
        500_000 => '6',
        800_000 => '7',
        1_000_000 => '8',
        other => return Err(ParseError::UnsupportedBitrate(other)),
    };
    Ok(format!("S{}\r", code).into_bytes())
}
