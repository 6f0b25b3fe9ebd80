//! Link configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bus link settings shared by the channel manager and its connectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Nominal bus bitrate in bit/s
    pub bitrate: u32,
    /// SocketCAN interface tried first
    pub socketcan_interface: String,
    /// Run `ip link set <iface> up type can bitrate <b>` before opening
    pub bring_up_interface: bool,
    /// Serial port of the SLCAN adapter; auto-detected by USB id when unset
    pub slcan_port: Option<String>,
    /// Serial baud rate for SLCAN adapters
    pub slcan_baud: u32,
    /// Identifier of the health-check probe frame
    pub probe_id: u32,
    /// Payload of the health-check probe frame
    pub probe_data: Vec<u8>,
    /// Per-call receive timeout of the listener loop
    pub receive_timeout_ms: u64,
    /// Settle time before retrying an alternate transport
    pub retry_settle_ms: u64,
    /// Settle time after an adapter reset hint
    pub reset_settle_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bitrate: 500_000,
            socketcan_interface: "can0".to_string(),
            bring_up_interface: true,
            slcan_port: None,
            slcan_baud: 115_200,
            probe_id: 0x123,
            probe_data: vec![0xAA],
            receive_timeout_ms: 1000,
            retry_settle_ms: 1000,
            reset_settle_ms: 500,
        }
    }
}

impl LinkConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn retry_settle(&self) -> Duration {
        Duration::from_millis(self.retry_settle_ms)
    }

    pub fn reset_settle(&self) -> Duration {
        Duration::from_millis(self.reset_settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.bitrate, 500_000);
        assert_eq!(config.probe_id, 0x123);
        assert_eq!(config.probe_data, vec![0xAA]);
        assert_eq!(config.receive_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"socketcan_interface": "vcan0", "slcan_port": "/dev/ttyACM0"}"#)
                .unwrap();
        assert_eq!(config.socketcan_interface, "vcan0");
        assert_eq!(config.slcan_port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.retry_settle_ms, 1000);
    }
}
