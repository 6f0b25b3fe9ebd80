//! USB Vendor/Product IDs of serial CAN adapters that speak SLCAN

/// USB Vendor ID / Product ID pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vid: u16,
    pub pid: u16,
}

impl UsbId {
    pub const fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid }
    }
}

/// CANable / candleLight boards running slcan firmware (OpenMoko VID)
pub const CANABLE: UsbId = UsbId::new(0x1D50, 0x606F);

/// Fischl USBtin
pub const USBTIN: UsbId = UsbId::new(0x04D8, 0x000A);

/// Lawicel CANUSB (FTDI based, custom PID)
pub const LAWICEL_CANUSB: UsbId = UsbId::new(0x0403, 0xFFA8);

/// STM32 virtual COM port, used by many slcan clones
pub const STM32_VCP: UsbId = UsbId::new(0x0483, 0x5740);

/// Known adapters and their display names
pub const KNOWN_ADAPTERS: &[(UsbId, &str)] = &[
    (CANABLE, "CANable"),
    (USBTIN, "USBtin"),
    (LAWICEL_CANUSB, "Lawicel CANUSB"),
    (STM32_VCP, "STM32 slcan"),
];

/// Name of a known SLCAN adapter
pub fn slcan_adapter_name(vid: u16, pid: u16) -> Option<&'static str> {
    KNOWN_ADAPTERS
        .iter()
        .find(|(id, _)| id.vid == vid && id.pid == pid)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_adapters() {
        assert_eq!(slcan_adapter_name(0x1D50, 0x606F), Some("CANable"));
        assert_eq!(slcan_adapter_name(0x0403, 0xFFA8), Some("Lawicel CANUSB"));
        // Plain FTDI cable is not assumed to be a CAN adapter
        assert_eq!(slcan_adapter_name(0x0403, 0x6001), None);
    }
}
