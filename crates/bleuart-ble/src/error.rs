//! Error types for the Bluetooth host bindings

use bleuart_core::UartError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while bringing up or driving the Bluetooth stack
#[derive(Error, Debug)]
pub enum BleHostError {
    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Central stack error: {0}")]
    Central(#[from] btleplug::Error),

    #[cfg(target_os = "linux")]
    #[error("BlueZ error: {0}")]
    Bluez(#[from] bluer::Error),

    #[error("Peripheral role not supported on this platform")]
    PeripheralUnsupported,

    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unknown device {0}")]
    UnknownDevice(bleuart_core::DeviceAddress),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("Engine error: {0}")]
    Engine(#[from] UartError),
}

impl From<BleHostError> for UartError {
    fn from(err: BleHostError) -> Self {
        match err {
            BleHostError::Engine(inner) => inner,
            other => UartError::InvalidConfiguration {
                reason: other.to_string(),
            },
        }
    }
}

pub type Result<T> = core::result::Result<T, BleHostError>;
