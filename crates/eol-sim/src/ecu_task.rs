//! Virtual ECU behind an SLCAN adapter
//!
//! Runs the ECU on the device end of an async byte stream, speaking the same
//! ASCII framing a USB-CAN adapter would. The task uses a select! loop to:
//! - Send the ECU's status frames every period
//! - Parse host traffic (setup commands, probes)
//! - Stop when the adapter is unplugged

use std::io;
use std::sync::Arc;

use eol_protocol::slcan::{encode_frame, SlcanCodec, SlcanMessage};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use crate::ecu::VirtualEcu;

/// Run the virtual ECU on `stream` until the host closes it or `unplugged`
/// becomes true
pub async fn run_virtual_ecu<S>(
    mut stream: S,
    ecu: Arc<VirtualEcu>,
    mut unplugged: watch::Receiver<bool>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut codec = SlcanCodec::new();
    let mut buf = [0u8; 256];
    let mut status_timer = interval(ecu.period());
    status_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Virtual ECU session started");

    loop {
        tokio::select! {
            changed = unplugged.changed() => {
                if changed.is_err() || *unplugged.borrow() {
                    info!("Virtual ECU session unplugged");
                    break;
                }
            }

            _ = status_timer.tick() => {
                for frame in ecu.status_frames() {
                    trace!("Virtual ECU -> {}", frame);
                    stream.write_all(&encode_frame(&frame)).await?;
                }
                stream.flush().await?;
            }

            result = stream.read(&mut buf) => {
                let n = result?;
                if n == 0 {
                    debug!("Virtual ECU stream closed by host");
                    break;
                }

                codec.push_bytes(&buf[..n]);
                while let Some(message) = codec.next_message() {
                    match message {
                        SlcanMessage::Frame(frame) => ecu.handle_frame(&frame),
                        SlcanMessage::Command(command) => {
                            debug!("Virtual ECU adapter command {:?}", command);
                            stream.write_all(b"\r").await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    Ok(())
}
