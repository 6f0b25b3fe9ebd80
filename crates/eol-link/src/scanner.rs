//! Interface discovery
//!
//! SocketCAN interfaces are found under `/sys/class/net`; SLCAN adapters are
//! serial ports whose USB ids match a known adapter.

use std::path::Path;

use serialport::{available_ports, SerialPortType};
use tracing::{info, warn};

use crate::error::LinkError;
use crate::usb_ids::slcan_adapter_name;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// ARPHRD_CAN link type as reported in `/sys/class/net/<iface>/type`
const ARPHRD_CAN: &str = "280";

/// Information about a serial port
#[derive(Debug, Clone)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB product string
    pub product: Option<String>,
    /// Known SLCAN adapter name, if the USB id matched
    pub adapter: Option<&'static str>,
}

impl SerialPortInfo {
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product.clone(),
                adapter: slcan_adapter_name(usb.vid, usb.pid),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                product: None,
                adapter: None,
            },
        }
    }

    pub fn is_slcan_adapter(&self) -> bool {
        self.adapter.is_some()
    }
}

/// Serial port scanner
pub struct PortScanner {
    skip_patterns: Vec<String>,
}

impl PortScanner {
    pub fn new() -> Self {
        Self {
            skip_patterns: vec!["Bluetooth".to_string(), "debug".to_string()],
        }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, LinkError> {
        let ports = available_ports().map_err(|e| LinkError::EnumerationFailed(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect())
    }

    /// Serial ports that look like SLCAN adapters
    pub fn find_slcan_adapters(&self) -> Result<Vec<SerialPortInfo>, LinkError> {
        let adapters: Vec<_> = self
            .enumerate_ports()?
            .into_iter()
            .filter(SerialPortInfo::is_slcan_adapter)
            .collect();

        if adapters.is_empty() {
            info!("No SLCAN adapters found");
        } else {
            for adapter in &adapters {
                info!(
                    "Found {} on {}",
                    adapter.adapter.unwrap_or("SLCAN adapter"),
                    adapter.port
                );
            }
        }
        Ok(adapters)
    }

    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a network interface with this name exists
pub fn interface_exists(interface: &str) -> bool {
    Path::new(SYS_CLASS_NET).join(interface).exists()
}

/// Names of all CAN-type network interfaces (`can0`, `vcan0`, ...)
pub fn list_can_interfaces() -> Result<Vec<String>, LinkError> {
    let entries = std::fs::read_dir(SYS_CLASS_NET)
        .map_err(|e| LinkError::EnumerationFailed(format!("{}: {}", SYS_CLASS_NET, e)))?;

    let mut interfaces: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            std::fs::read_to_string(entry.path().join("type"))
                .map(|t| t.trim() == ARPHRD_CAN)
                .unwrap_or(false)
        })
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    interfaces.sort();
    Ok(interfaces)
}

/// Configure the bitrate of a SocketCAN interface and bring it up.
///
/// Needs `CAP_NET_ADMIN`. Returns `false` if `ip` failed, which is also the
/// case when the interface is already up.
pub async fn bring_up_interface(interface: &str, bitrate: u32) -> bool {
    let status = tokio::process::Command::new("ip")
        .args(["link", "set", interface, "up", "type", "can", "bitrate"])
        .arg(bitrate.to_string())
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            info!("Brought up {} at {} bit/s", interface, bitrate);
            true
        }
        Ok(status) => {
            warn!("ip link set {} up exited with {}", interface, status);
            false
        }
        Err(e) => {
            warn!("Failed to run ip link for {}: {}", interface, e);
            false
        }
    }
}
