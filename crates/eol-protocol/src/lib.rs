//! EOL Protocol Library
//!
//! Pure data types and codecs shared by every part of the end-of-line test
//! bench. Nothing in this crate performs I/O.
//!
//! - **Frame**: a classic CAN data frame with its host arrival time
//! - **SLCAN**: the Lawicel ASCII framing spoken by USB-CAN serial adapters
//! - **Feedback**: decoding of relay states and 12-bit analog codes reported
//!   by the device under test
//!
//! # Example
//!
//! ```rust
//! use eol_protocol::feedback::{decode_volts, ByteLength};
//! use eol_protocol::slcan::{SlcanCodec, SlcanMessage};
//!
//! let mut codec = SlcanCodec::new();
//! codec.push_bytes(b"t04020FFF\r");
//!
//! if let Some(SlcanMessage::Frame(frame)) = codec.next_message() {
//!     let volts = decode_volts(&frame, 0, ByteLength::Two, 5.0).unwrap();
//!     assert_eq!(volts, 5.0);
//! }
//! ```

pub mod error;
pub mod feedback;
pub mod frame;
pub mod slcan;

pub use error::{DecodeError, ParseError};
pub use feedback::{ByteLength, FULL_SCALE_CODE};
pub use frame::{parse_frame_id, Frame};
