//! Error types for the BLE UART engine
//!
//! Every failure the engine can observe maps onto one variant of [`UartError`].
//! None of them are fatal: the affected connection or transfer is discarded and
//! the caller may retry through `start()` or `connect()`.

use crate::types::DeviceAddress;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised by the link engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UartError {
    #[error("Failed to connect to {address}: {reason}")]
    TransportConnectFailure { address: DeviceAddress, reason: String },

    #[error("Service discovery failed on {address}: {reason}")]
    ServiceDiscoveryFailure { address: DeviceAddress, reason: String },

    #[error("Failed to enable notifications on {address}: {reason}")]
    SubscriptionFailure { address: DeviceAddress, reason: String },

    #[error("Transfer of {len} bytes to {address} failed")]
    TransferFailure { address: DeviceAddress, len: usize },

    #[error("Failed to start advertising: {reason}")]
    AdvertiseStartFailure { reason: String },

    #[error("Failed to start scanning: {reason}")]
    ScanStartFailure { reason: String },

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl UartError {
    /// Address of the remote endpoint the failure concerns, if any
    pub fn address(&self) -> Option<DeviceAddress> {
        match self {
            UartError::TransportConnectFailure { address, .. }
            | UartError::ServiceDiscoveryFailure { address, .. }
            | UartError::SubscriptionFailure { address, .. }
            | UartError::TransferFailure { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Result alias used throughout the engine
pub type Result<T> = core::result::Result<T, UartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_addresses() {
        let address = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        let err = UartError::SubscriptionFailure {
            address,
            reason: "descriptor missing".to_string(),
        };
        assert_eq!(err.address(), Some(address));

        let err = UartError::TransferFailure { address, len: 20 };
        assert_eq!(err.address(), Some(address));

        let err = UartError::ScanStartFailure {
            reason: "adapter off".to_string(),
        };
        assert_eq!(err.address(), None);
        assert_eq!(err.to_string(), "Failed to start scanning: adapter off");
    }
}
