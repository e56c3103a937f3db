//! Peripheral role bindings
//!
//! btleplug has no peripheral mode, so the server role is backed by a
//! platform-specific [`PeripheralBackend`]: BlueZ via `bluer` on Linux, and a
//! fallback elsewhere that reports advertising as unavailable.

use std::sync::Arc;

use bleuart_core::{AdvertisingParameters, DeviceAddress, DualRoleUart, ServerCommand, ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;

mod fallback;
#[cfg(target_os = "linux")]
mod linux;

pub use fallback::FallbackPeripheral;
#[cfg(target_os = "linux")]
pub use linux::LinuxPeripheral;

// ----------------------------------------------------------------------------
// Cross-platform Peripheral Trait
// ----------------------------------------------------------------------------

/// Local GATT server and advertiser
///
/// Backends report inbound activity (subscriptions, writes, notification
/// outcomes) straight to the engine they were built with.
#[async_trait::async_trait]
pub trait PeripheralBackend: Send {
    /// Serve the UART service and advertise `service_data` under `service`
    async fn start_advertising(
        &mut self,
        service: Uuid,
        service_data: Vec<u8>,
        parameters: AdvertisingParameters,
    ) -> Result<()>;

    /// Stop advertising and drop the GATT application
    async fn stop_advertising(&mut self);

    /// Queue one notification; the outcome arrives as `NotificationSent`
    async fn notify(&mut self, address: DeviceAddress, data: Vec<u8>);

    /// Close the link to a subscribed central
    async fn cancel_connection(&mut self, address: DeviceAddress);

    fn is_advertising(&self) -> bool;
}

// ----------------------------------------------------------------------------
// Platform Detection and Factory
// ----------------------------------------------------------------------------

/// Platform-specific peripheral
pub enum PlatformPeripheral {
    #[cfg(target_os = "linux")]
    Linux(LinuxPeripheral),
    Fallback(FallbackPeripheral),
}

impl PlatformPeripheral {
    /// Create the appropriate peripheral for the current platform
    pub fn new(engine: Arc<DualRoleUart>) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::Linux(LinuxPeripheral::new(engine))
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(FallbackPeripheral::new(engine))
        }
    }
}

#[async_trait::async_trait]
impl PeripheralBackend for PlatformPeripheral {
    async fn start_advertising(
        &mut self,
        service: Uuid,
        service_data: Vec<u8>,
        parameters: AdvertisingParameters,
    ) -> Result<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut backend) => {
                backend.start_advertising(service, service_data, parameters).await
            }
            Self::Fallback(ref mut backend) => {
                backend.start_advertising(service, service_data, parameters).await
            }
        }
    }

    async fn stop_advertising(&mut self) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut backend) => backend.stop_advertising().await,
            Self::Fallback(ref mut backend) => backend.stop_advertising().await,
        }
    }

    async fn notify(&mut self, address: DeviceAddress, data: Vec<u8>) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut backend) => backend.notify(address, data).await,
            Self::Fallback(ref mut backend) => backend.notify(address, data).await,
        }
    }

    async fn cancel_connection(&mut self, address: DeviceAddress) {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref mut backend) => backend.cancel_connection(address).await,
            Self::Fallback(ref mut backend) => backend.cancel_connection(address).await,
        }
    }

    fn is_advertising(&self) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::Linux(ref backend) => backend.is_advertising(),
            Self::Fallback(ref backend) => backend.is_advertising(),
        }
    }
}

// ----------------------------------------------------------------------------
// Peripheral Host
// ----------------------------------------------------------------------------

/// Drives the engine's server role with a [`PeripheralBackend`]
pub struct PeripheralHost<B> {
    backend: B,
    engine: Arc<DualRoleUart>,
}

impl<B: PeripheralBackend> PeripheralHost<B> {
    pub fn new(backend: B, engine: Arc<DualRoleUart>) -> Self {
        Self { backend, engine }
    }

    /// Execute commands until the command channel closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ServerCommand>) {
        while let Some(command) = commands.recv().await {
            self.execute(command).await;
        }

        if self.backend.is_advertising() {
            self.backend.stop_advertising().await;
        }
        debug!("Peripheral host stopped");
    }

    async fn execute(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::StartAdvertising {
                service,
                service_data,
                parameters,
            } => {
                let event = match self
                    .backend
                    .start_advertising(service, service_data, parameters)
                    .await
                {
                    Ok(()) => ServerEvent::AdvertisingStarted,
                    Err(e) => {
                        warn!("Advertising failed: {}", e);
                        ServerEvent::AdvertisingFailed {
                            reason: e.to_string(),
                        }
                    }
                };
                self.engine.handle_server_event(event);
            }
            ServerCommand::StopAdvertising => self.backend.stop_advertising().await,
            ServerCommand::Notify { address, data } => self.backend.notify(address, data).await,
            ServerCommand::CancelConnection { address } => {
                self.backend.cancel_connection(address).await
            }
        }
    }
}
