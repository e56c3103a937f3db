//! BLE UART wire contract: UUIDs, ATT sizing, and payload framing

use smallvec::SmallVec;
use uuid::Uuid;

use crate::types::DeviceAddress;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// UART service, expressed on the Bluetooth base UUID so every stack accepts it
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x00000001_0000_1000_8000_00805F9B34FB);

/// Inbound-to-peripheral characteristic (write / write without response)
pub const UART_TX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00000002_0000_1000_8000_00805F9B34FB);

/// Outbound-from-peripheral characteristic (read / notify)
pub const UART_RX_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00000003_0000_1000_8000_00805F9B34FB);

/// Client characteristic configuration descriptor
pub const CLIENT_CONFIG_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805F9B34FB);

/// Device Information service
pub const DEVICE_INFO_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000180A_0000_1000_8000_00805F9B34FB);

/// Manufacturer name string
pub const DEVICE_INFO_MANUFACTURER_UUID: Uuid =
    Uuid::from_u128(0x00002A29_0000_1000_8000_00805F9B34FB);

/// Model number string
pub const DEVICE_INFO_MODEL_UUID: Uuid = Uuid::from_u128(0x00002A24_0000_1000_8000_00805F9B34FB);

/// Hardware revision string
pub const DEVICE_INFO_HARDWARE_UUID: Uuid =
    Uuid::from_u128(0x00002A26_0000_1000_8000_00805F9B34FB);

/// Firmware revision string
pub const DEVICE_INFO_FIRMWARE_UUID: Uuid =
    Uuid::from_u128(0x00002A28_0000_1000_8000_00805F9B34FB);

// ----------------------------------------------------------------------------
// ATT Sizing
// ----------------------------------------------------------------------------

/// MTU every link starts with before an exchange
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Largest MTU the ATT layer allows
pub const MAX_ATT_MTU: u16 = 517;

/// Opcode and handle overhead of a write or notification
pub const ATT_HEADER_LEN: usize = 3;

/// Largest payload a single write or notification can carry at `mtu`
pub fn max_payload_len(mtu: u16) -> usize {
    (mtu as usize).saturating_sub(ATT_HEADER_LEN).max(1)
}

/// Split a message into chunks that each fit a single operation at `mtu`
///
/// Chunks preserve order; concatenating them yields `data`. An empty message
/// produces no chunks.
pub fn chunk_payload(data: &[u8], mtu: u16) -> impl Iterator<Item = &[u8]> {
    data.chunks(max_payload_len(mtu))
}

// ----------------------------------------------------------------------------
// Neighbor Advertisement Framing
// ----------------------------------------------------------------------------

/// Parse a bridging peer's neighbor list, `<AA:BB:CC:DD:EE:FF 11:22:33:44:55:66>`
///
/// Returns `None` when the payload is not framed as a neighbor list, in which
/// case it is ordinary user data. Every entry between the brackets must be a
/// valid address for the payload to count as a neighbor list.
pub fn parse_neighbor_list(data: &[u8]) -> Option<SmallVec<[DeviceAddress; 4]>> {
    let text = core::str::from_utf8(data).ok()?;
    let inner = text.trim_end_matches(['\r', '\n']).strip_prefix('<')?.strip_suffix('>')?;

    let addresses = inner
        .split_whitespace()
        .map(|entry| entry.parse::<DeviceAddress>().ok())
        .collect::<Option<SmallVec<[DeviceAddress; 4]>>>()?;

    if addresses.is_empty() {
        return None;
    }
    Some(addresses)
}

/// Encode a neighbor list in the framing [`parse_neighbor_list`] accepts
pub fn encode_neighbor_list(addresses: &[DeviceAddress]) -> Vec<u8> {
    let body = addresses
        .iter()
        .map(|address| address.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!("<{}>", body).into_bytes()
}
