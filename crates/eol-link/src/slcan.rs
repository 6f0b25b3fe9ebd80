//! SLCAN transport over any byte stream
//!
//! Real adapters are reached through `tokio_serial`; the simulated ECU is
//! attached through `tokio::io::duplex`. Both share the same code path.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eol_protocol::slcan::{
    bitrate_command, encode_frame, SlcanCodec, SlcanMessage, CLOSE_COMMAND, OPEN_COMMAND,
};
use eol_protocol::Frame;
use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

use crate::config::LinkConfig;
use crate::error::TransportError;
use crate::scanner::PortScanner;
use crate::transport::{BusTransport, Connector};

struct SlcanReader<T> {
    io: ReadHalf<T>,
    codec: SlcanCodec,
    buffer: Vec<u8>,
}

/// CAN access through an SLCAN adapter
///
/// Generic over the I/O type. For the simulated ECU, use `DuplexStream`
/// from `tokio::io::duplex()`.
pub struct SlcanTransport<T> {
    name: String,
    reader: Mutex<SlcanReader<T>>,
    writer: Mutex<WriteHalf<T>>,
    closed: AtomicBool,
}

impl SlcanTransport<SerialStream> {
    /// Open a serial adapter and start its CAN channel
    pub async fn open_serial(port: &str, baud: u32, bitrate: u32) -> Result<Self, TransportError> {
        let stream = open_serial_stream(port, baud)?;
        Self::open(stream, port, bitrate).await
    }
}

impl<T> SlcanTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a stream without sending any setup commands
    pub fn new(io: T, name: impl Into<String>) -> Self {
        let (read_half, write_half) = split(io);
        Self {
            name: name.into(),
            reader: Mutex::new(SlcanReader {
                io: read_half,
                codec: SlcanCodec::new(),
                buffer: vec![0u8; 256],
            }),
            writer: Mutex::new(write_half),
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap a stream and run the close / bitrate / open setup sequence
    pub async fn open(io: T, name: impl Into<String>, bitrate: u32) -> Result<Self, TransportError> {
        let transport = Self::new(io, name);
        let setup = [
            CLOSE_COMMAND.to_vec(),
            bitrate_command(bitrate)?,
            OPEN_COMMAND.to_vec(),
        ];
        for command in &setup {
            transport.write_raw(command).await?;
        }
        info!(
            "Opened SLCAN channel on {} at {} bit/s",
            transport.name, bitrate
        );
        Ok(transport)
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl<T> BusTransport for SlcanTransport<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        trace!("{} TX {}", self.name, frame);
        self.write_raw(&encode_frame(frame)).await
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Frame>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let deadline = Instant::now() + timeout;
        let mut reader = self.reader.lock().await;
        let SlcanReader { io, codec, buffer } = &mut *reader;

        loop {
            while let Some(message) = codec.next_message() {
                match message {
                    SlcanMessage::Frame(frame) => {
                        trace!("{} RX {}", self.name, frame);
                        return Ok(Some(frame));
                    }
                    SlcanMessage::Bell => debug!("Adapter {} rejected a command", self.name),
                    _ => {}
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match tokio::time::timeout(remaining, io.read(buffer)).await {
                Ok(Ok(0)) => return Err(TransportError::Closed),
                Ok(Ok(n)) => codec.push_bytes(&buffer[..n]),
                Ok(Err(e)) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    continue
                }
                Ok(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                Err(_) => return Ok(None),
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(CLOSE_COMMAND).await;
        let _ = writer.shutdown().await;
        debug!("Closed SLCAN channel on {}", self.name);
    }
}

fn open_serial_stream(port: &str, baud: u32) -> Result<SerialStream, TransportError> {
    tokio_serial::new(port, baud)
        .timeout(Duration::from_millis(100))
        .open_native_async()
        .map_err(|e| TransportError::OpenFailed {
            interface: port.to_string(),
            reason: e.to_string(),
        })
}

/// Opens an SLCAN adapter on a serial port
pub struct SlcanSerialConnector {
    port: Option<String>,
    baud: u32,
    bitrate: u32,
    reset_settle: Duration,
}

impl SlcanSerialConnector {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            port: config.slcan_port.clone(),
            baud: config.slcan_baud,
            bitrate: config.bitrate,
            reset_settle: config.reset_settle(),
        }
    }

    fn resolve_port(&self) -> Result<String, TransportError> {
        if let Some(port) = &self.port {
            return Ok(port.clone());
        }

        let adapters = PortScanner::new()
            .find_slcan_adapters()
            .map_err(|e| TransportError::OpenFailed {
                interface: "slcan".to_string(),
                reason: e.to_string(),
            })?;
        adapters
            .into_iter()
            .next()
            .map(|adapter| adapter.port)
            .ok_or_else(|| TransportError::OpenFailed {
                interface: "slcan".to_string(),
                reason: "no SLCAN adapter found".to_string(),
            })
    }
}

#[async_trait]
impl Connector for SlcanSerialConnector {
    fn name(&self) -> &str {
        "slcan"
    }

    async fn reset(&self) -> Result<(), TransportError> {
        let port = self.resolve_port()?;
        let mut stream = open_serial_stream(&port, self.baud)?;
        stream.write_all(CLOSE_COMMAND).await?;
        stream.flush().await?;
        drop(stream);

        debug!("Sent channel close to SLCAN adapter on {}", port);
        tokio::time::sleep(self.reset_settle).await;
        Ok(())
    }

    async fn open(&self) -> Result<Arc<dyn BusTransport>, TransportError> {
        let port = self.resolve_port()?;
        let transport = SlcanTransport::open_serial(&port, self.baud, self.bitrate).await?;
        Ok(Arc::new(transport))
    }
}
