//! Plug-able virtual CAN adapter
//!
//! [`VirtualConnector`] plugs into the channel manager like any real
//! transport. Every `open()` starts a fresh ECU session over an in-memory
//! SLCAN stream. [`VirtualAdapter::unplug`] ends all live sessions, so the
//! host sees the same transport errors as with a pulled USB cable, and
//! refuses new ones until [`VirtualAdapter::replug`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eol_link::{BusTransport, Connector, SlcanTransport, TransportError};
use tokio::io::duplex;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::ecu::VirtualEcu;
use crate::ecu_task::run_virtual_ecu;

/// Interface name reported by virtual connections
pub const VIRTUAL_INTERFACE: &str = "vcan-sim";

const STREAM_BUFFER: usize = 4096;

/// The virtual USB-CAN adapter with the ECU behind it
#[derive(Debug)]
pub struct VirtualAdapter {
    ecu: Arc<VirtualEcu>,
    bitrate: u32,
    plugged: AtomicBool,
    opens: AtomicU64,
    unplug_tx: watch::Sender<bool>,
}

impl VirtualAdapter {
    pub fn new(ecu: Arc<VirtualEcu>) -> Arc<Self> {
        let (unplug_tx, _) = watch::channel(false);
        Arc::new(Self {
            ecu,
            bitrate: 500_000,
            plugged: AtomicBool::new(true),
            opens: AtomicU64::new(0),
            unplug_tx,
        })
    }

    pub fn ecu(&self) -> &Arc<VirtualEcu> {
        &self.ecu
    }

    /// Connector to hand to the channel manager
    pub fn connector(self: &Arc<Self>) -> VirtualConnector {
        VirtualConnector(self.clone())
    }

    /// Pull the cable: live sessions end and new opens fail
    pub fn unplug(&self) {
        info!("Virtual adapter unplugged");
        self.plugged.store(false, Ordering::SeqCst);
        self.unplug_tx.send_replace(true);
    }

    pub fn replug(&self) {
        info!("Virtual adapter plugged in");
        self.unplug_tx.send_replace(false);
        self.plugged.store(true, Ordering::SeqCst);
    }

    pub fn is_plugged(&self) -> bool {
        self.plugged.load(Ordering::SeqCst)
    }

    /// Successful opens so far
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }
}

/// [`Connector`] side of a [`VirtualAdapter`]
pub struct VirtualConnector(Arc<VirtualAdapter>);

#[async_trait]
impl Connector for VirtualConnector {
    fn name(&self) -> &str {
        "virtual"
    }

    async fn open(&self) -> Result<Arc<dyn BusTransport>, TransportError> {
        let adapter = &self.0;
        if !adapter.is_plugged() {
            return Err(TransportError::OpenFailed {
                interface: VIRTUAL_INTERFACE.to_string(),
                reason: "adapter unplugged".to_string(),
            });
        }

        let (host, device) = duplex(STREAM_BUFFER);
        let ecu = adapter.ecu.clone();
        let unplugged = adapter.unplug_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = run_virtual_ecu(device, ecu, unplugged).await {
                warn!("Virtual ECU session ended: {}", e);
            }
        });

        let transport = SlcanTransport::open(host, VIRTUAL_INTERFACE, adapter.bitrate).await?;
        adapter.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(transport))
    }
}
