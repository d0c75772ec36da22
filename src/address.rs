use crate::AvdtpError;
use core::fmt;

/// A Bluetooth Device Address (`BD_ADDR`) identifying an AVDTP peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BluetoothAddress(pub [u8; 6]);

impl BluetoothAddress {
    /// Create a new Bluetooth address from bytes
    #[must_use]
    pub const fn new(addr: [u8; 6]) -> Self {
        Self(addr)
    }

    /// Get the raw address bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parse a Bluetooth address from a colon-separated hex string
    ///
    /// # Errors
    /// Returns `AvdtpError::BadParams` unless the string has the form `AA:BB:CC:DD:EE:FF`
    pub fn from_hex(hex: &str) -> Result<Self, AvdtpError> {
        if hex.len() != 17 {
            return Err(AvdtpError::BadParams);
        }

        let mut bytes = [0u8; 6];
        let mut parts = hex.split(':');
        for byte in &mut bytes {
            let part = parts.next().ok_or(AvdtpError::BadParams)?;
            if part.len() != 2 {
                return Err(AvdtpError::BadParams);
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| AvdtpError::BadParams)?;
        }
        if parts.next().is_some() {
            return Err(AvdtpError::BadParams);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for BluetoothAddress {
    fn from(addr: [u8; 6]) -> Self {
        Self(addr)
    }
}

impl From<BluetoothAddress> for [u8; 6] {
    fn from(addr: BluetoothAddress) -> Self {
        addr.0
    }
}

impl From<BluetoothAddress> for bt_hci::param::BdAddr {
    fn from(addr: BluetoothAddress) -> Self {
        bt_hci::param::BdAddr::new(addr.0)
    }
}

impl TryFrom<bt_hci::param::BdAddr> for BluetoothAddress {
    type Error = AvdtpError;

    fn try_from(bd_addr: bt_hci::param::BdAddr) -> Result<Self, Self::Error> {
        let bytes: [u8; 6] = bd_addr.raw().try_into().map_err(|_| AvdtpError::BadParams)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&str> for BluetoothAddress {
    type Error = AvdtpError;

    fn try_from(hex: &str) -> Result<Self, Self::Error> {
        Self::from_hex(hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    #[test]
    fn test_address_display() {
        let addr = BluetoothAddress::new([0x0A, 0xB1, 0x2C, 0xD3, 0x4E, 0xF5]);
        assert_eq!(addr.to_string(), "0A:B1:2C:D3:4E:F5");
    }

    #[test]
    fn test_address_from_hex() {
        let addr = BluetoothAddress::from_hex("12:34:56:78:9A:BC").unwrap();
        assert_eq!(addr.as_bytes(), &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);

        assert!(BluetoothAddress::from_hex("12:34:56:78:9A").is_err());
        assert!(BluetoothAddress::from_hex("12-34-56-78-9A-BC").is_err());
        assert!(BluetoothAddress::from_hex("12:34:56:78:9A:BG").is_err());
    }

    #[test]
    fn test_address_bd_addr_conversion() {
        let addr = BluetoothAddress::new([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        let bd_addr: bt_hci::param::BdAddr = addr.into();
        assert_eq!(bd_addr.raw(), &addr.0[..]);
        assert_eq!(BluetoothAddress::try_from(bd_addr).unwrap(), addr);
    }
}
