//! Core types for the BLE UART engine
//!
//! Newtypes for the values that cross component boundaries: the random tie-break
//! identity carried in advertisements and the 48-bit transport address of a
//! remote device.

use core::fmt;
use core::str::FromStr;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::errors::UartError;

// ----------------------------------------------------------------------------
// Peer Identity
// ----------------------------------------------------------------------------

/// Random value broadcast in the advertisement to break symmetric discovery ties
///
/// Regenerated on every process start. It is not a stable device identity and
/// carries no meaning besides its numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerIdentity(u32);

impl PeerIdentity {
    /// Size of the identity on the wire
    pub const WIRE_LEN: usize = 4;

    /// Create an identity from a raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Draw a fresh identity from the OS random source
    pub fn random() -> Self {
        Self(OsRng.next_u32())
    }

    /// Get the raw value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Encode as the advertisement service-data payload (network byte order)
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        self.0.to_be_bytes()
    }

    /// Decode from advertisement service data
    ///
    /// Returns `None` when the payload is shorter than four bytes. Trailing
    /// bytes are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; Self::WIRE_LEN] = bytes.get(..Self::WIRE_LEN)?.try_into().ok()?;
        Some(Self(u32::from_be_bytes(raw)))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

impl From<u32> for PeerIdentity {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ----------------------------------------------------------------------------
// Device Address
// ----------------------------------------------------------------------------

/// 48-bit Bluetooth transport address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// Create an address from its six octets, most significant first
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw octets
    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for DeviceAddress {
    type Err = UartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut octets = s.split(':');

        for slot in bytes.iter_mut() {
            let octet = octets
                .next()
                .filter(|o| o.len() == 2)
                .ok_or_else(|| UartError::InvalidAddress(s.to_string()))?;
            let decoded =
                hex::decode(octet).map_err(|_| UartError::InvalidAddress(s.to_string()))?;
            *slot = decoded[0];
        }

        if octets.next().is_some() {
            return Err(UartError::InvalidAddress(s.to_string()));
        }

        Ok(Self(bytes))
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

// ----------------------------------------------------------------------------
// Link Role
// ----------------------------------------------------------------------------

/// Which side of the engine owns a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkRole {
    /// Connection initiated by the local central
    Client,
    /// Subscription accepted by the local peripheral
    Server,
}

impl fmt::Display for LinkRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkRole::Client => write!(f, "client"),
            LinkRole::Server => write!(f, "server"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_wire_format() {
        let identity = PeerIdentity::new(0x0102_0304);
        assert_eq!(identity.to_bytes(), [1, 2, 3, 4]);
        assert_eq!(PeerIdentity::from_bytes(&[1, 2, 3, 4]), Some(identity));
        assert_eq!(PeerIdentity::from_bytes(&[1, 2, 3, 4, 9]), Some(identity));
        assert_eq!(PeerIdentity::from_bytes(&[1, 2, 3]), None);
        assert_eq!(PeerIdentity::from_bytes(&[]), None);
    }

    #[test]
    fn test_address_display_and_parse() {
        let address = DeviceAddress::new([0xAB, 0xCD, 0xEF, 0x01, 0x23, 0x45]);
        assert_eq!(address.to_string(), "AB:CD:EF:01:23:45");
        assert_eq!("AB:CD:EF:01:23:45".parse::<DeviceAddress>().unwrap(), address);
        assert_eq!("ab:cd:ef:01:23:45".parse::<DeviceAddress>().unwrap(), address);
    }

    #[test]
    fn test_address_parse_rejects_malformed() {
        assert!("AB:CD:EF:01:23".parse::<DeviceAddress>().is_err());
        assert!("AB:CD:EF:01:23:45:67".parse::<DeviceAddress>().is_err());
        assert!("AB:CD:EF:01:23:4".parse::<DeviceAddress>().is_err());
        assert!("AB:CD:EF:01:23:ZZ".parse::<DeviceAddress>().is_err());
        assert!("".parse::<DeviceAddress>().is_err());
    }
}
