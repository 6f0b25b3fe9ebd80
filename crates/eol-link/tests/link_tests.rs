//! End-to-end link tests over in-memory SLCAN streams

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eol_link::{
    await_fresh, BusTransport, ChannelManager, Connector, FrameBuffer, LinkConfig, LinkStatus,
    SlcanTransport, TransportError,
};
use eol_protocol::slcan::{encode_frame, SlcanCodec, SlcanMessage};
use eol_protocol::Frame;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;

// ============================================================================
// Helpers
// ============================================================================

mod helpers {
    use super::*;

    /// Minimal SLCAN device: reports a counter on 0x30 every 5 ms and counts
    /// probe frames from the host
    pub async fn run_device(
        mut io: DuplexStream,
        counter: Arc<AtomicU64>,
        probes: Arc<AtomicU64>,
        mut unplug: watch::Receiver<bool>,
    ) {
        let mut codec = SlcanCodec::new();
        let mut buf = [0u8; 128];
        let mut tick = tokio::time::interval(Duration::from_millis(5));

        loop {
            tokio::select! {
                _ = unplug.changed() => break,
                _ = tick.tick() => {
                    let value = counter.fetch_add(1, Ordering::SeqCst) as u8;
                    let frame = Frame::new(0x30, &[value]).unwrap();
                    if io.write_all(&encode_frame(&frame)).await.is_err() {
                        break;
                    }
                }
                read = io.read(&mut buf) => {
                    match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            codec.push_bytes(&buf[..n]);
                            while let Some(message) = codec.next_message() {
                                match message {
                                    SlcanMessage::Frame(frame) if frame.id() == 0x123 => {
                                        probes.fetch_add(1, Ordering::SeqCst);
                                    }
                                    SlcanMessage::Command(_) => {
                                        if io.write_all(b"\r").await.is_err() {
                                            return;
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    pub struct DuplexConnector {
        pub plugged: AtomicBool,
        pub counter: Arc<AtomicU64>,
        pub probes: Arc<AtomicU64>,
        pub unplug_tx: watch::Sender<bool>,
    }

    impl DuplexConnector {
        pub fn new() -> Arc<Self> {
            let (unplug_tx, _) = watch::channel(false);
            Arc::new(Self {
                plugged: AtomicBool::new(true),
                counter: Arc::new(AtomicU64::new(0)),
                probes: Arc::new(AtomicU64::new(0)),
                unplug_tx,
            })
        }

        pub fn unplug(&self) {
            self.plugged.store(false, Ordering::SeqCst);
            self.unplug_tx.send_replace(true);
        }

        pub fn replug(&self) {
            self.unplug_tx.send_replace(false);
            self.plugged.store(true, Ordering::SeqCst);
        }
    }

    pub struct SharedConnector(pub Arc<DuplexConnector>);

    #[async_trait]
    impl Connector for SharedConnector {
        fn name(&self) -> &str {
            "duplex"
        }

        async fn open(&self) -> Result<Arc<dyn BusTransport>, TransportError> {
            if !self.0.plugged.load(Ordering::SeqCst) {
                return Err(TransportError::OpenFailed {
                    interface: "duplex".to_string(),
                    reason: "unplugged".to_string(),
                });
            }
            let (host, device) = duplex(4096);
            tokio::spawn(run_device(
                device,
                self.0.counter.clone(),
                self.0.probes.clone(),
                self.0.unplug_tx.subscribe(),
            ));
            let transport = SlcanTransport::open(host, "duplex", 500_000).await?;
            Ok(Arc::new(transport))
        }
    }

    pub fn manager(device: &Arc<DuplexConnector>) -> ChannelManager {
        let config = LinkConfig {
            receive_timeout_ms: 20,
            retry_settle_ms: 5,
            ..LinkConfig::default()
        };
        ChannelManager::new(
            vec![Box::new(SharedConnector(device.clone()))],
            &config,
            FrameBuffer::new(),
        )
    }
}

use helpers::*;

// ============================================================================
// Listener and correlator
// ============================================================================

#[tokio::test]
async fn test_listener_fills_buffer() {
    let device = DuplexConnector::new();
    let mut manager = manager(&device);
    manager.establish().await.unwrap();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let frames = manager.frames();
    assert!(frames.len() >= 3, "buffer had {} frames", frames.len());
    assert!(frames.latest(0x30).is_some());
}

#[tokio::test]
async fn test_fresh_frame_follows_baseline() {
    let device = DuplexConnector::new();
    let mut manager = manager(&device);
    manager.establish().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let frames = manager.frames();
    let before = frames.latest(0x30).unwrap();
    let fresh = await_fresh(&frames, 0x30, Duration::from_millis(200))
        .await
        .expect("fresh frame");
    assert!(fresh.timestamp() > before.timestamp());
}

#[tokio::test]
async fn test_unknown_id_times_out() {
    let device = DuplexConnector::new();
    let mut manager = manager(&device);
    manager.establish().await.unwrap();

    let result = await_fresh(&manager.frames(), 0x31, Duration::from_millis(50)).await;
    assert!(result.is_none());
}

// ============================================================================
// Health check and reconnection
// ============================================================================

#[tokio::test]
async fn test_probe_reaches_device() {
    let device = DuplexConnector::new();
    let mut manager = manager(&device);
    let handle = manager.establish().await.unwrap();

    assert!(manager.health_check(&handle).await);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(device.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unplug_then_replug() {
    let device = DuplexConnector::new();
    let mut manager = manager(&device);
    let rx = manager.subscribe();
    let first = manager.establish().await.unwrap();

    device.unplug();
    tokio::time::sleep(Duration::from_millis(30)).await;

    let status = manager.maintain().await;
    assert!(!status.is_connected(), "status was {:?}", status);
    assert!(!first.is_valid());
    assert!(rx.borrow().is_none());

    device.replug();
    let status = manager.maintain().await;
    assert!(matches!(status, LinkStatus::Reconnected { .. }));

    let second = rx.borrow().clone().expect("new handle");
    assert!(second.is_valid());
    assert!(second.generation() > first.generation());

    let frames = manager.frames();
    let fresh = await_fresh(&frames, 0x30, Duration::from_millis(200)).await;
    assert!(fresh.is_some());
}
