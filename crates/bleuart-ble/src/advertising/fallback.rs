//! Fallback peripheral for platforms without peripheral-mode support

use std::sync::Arc;

use bleuart_core::{AdvertisingParameters, DeviceAddress, DualRoleUart, ServerEvent};
use tracing::warn;
use uuid::Uuid;

use crate::error::{BleHostError, Result};

use super::PeripheralBackend;

// ----------------------------------------------------------------------------
// Fallback Implementation
// ----------------------------------------------------------------------------

/// Peripheral that can never advertise
///
/// Starting fails with [`BleHostError::PeripheralUnsupported`], which the
/// engine surfaces as an advertise-start failure. A central-only gap role is
/// the way to run on these platforms.
pub struct FallbackPeripheral {
    engine: Arc<DualRoleUart>,
}

impl FallbackPeripheral {
    pub fn new(engine: Arc<DualRoleUart>) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl PeripheralBackend for FallbackPeripheral {
    async fn start_advertising(
        &mut self,
        _service: Uuid,
        _service_data: Vec<u8>,
        parameters: AdvertisingParameters,
    ) -> Result<()> {
        warn!(
            "BLE advertising not supported on this platform. '{}' will not be discoverable; \
            use the central gap role instead.",
            parameters.local_name
        );
        Err(BleHostError::PeripheralUnsupported)
    }

    async fn stop_advertising(&mut self) {}

    async fn notify(&mut self, address: DeviceAddress, _data: Vec<u8>) {
        self.engine.handle_server_event(ServerEvent::NotificationSent {
            address,
            success: false,
        });
    }

    async fn cancel_connection(&mut self, _address: DeviceAddress) {}

    fn is_advertising(&self) -> bool {
        false
    }
}
