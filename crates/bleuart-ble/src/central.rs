//! Central role binding over btleplug
//!
//! [`CentralHost`] executes [`ClientCommand`]s against the first BLE adapter
//! and translates adapter events and operation outcomes back into
//! [`ClientEvent`]s for the engine. Every transport operation is bounded by the
//! configured operation timeout; a timeout is reported as that operation's
//! failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bleuart_core::protocol::{
    CLIENT_CONFIG_DESCRIPTOR_UUID, DEFAULT_ATT_MTU, DEVICE_INFO_SERVICE_UUID,
    UART_RX_CHARACTERISTIC_UUID, UART_SERVICE_UUID, UART_TX_CHARACTERISTIC_UUID,
};
use bleuart_core::{
    ClientCommand, ClientEvent, DeviceAddress, DualRoleUart, GattProfile, LinkStatus, WriteMode,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BleHostError, Result};

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Run `operation` under `limit`, flattening both failure kinds into a reason
pub(crate) async fn bounded<T, E, F>(limit: Duration, operation: F) -> core::result::Result<T, String>
where
    E: core::fmt::Display,
    F: Future<Output = core::result::Result<T, E>>,
{
    match timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(BleHostError::Timeout(limit).to_string()),
    }
}

/// Services found on a remote device, reduced to UUIDs
pub type ServiceLayout = Vec<(Uuid, Vec<(Uuid, Vec<Uuid>)>)>;

/// Summarise a discovered layout as the engine sees it
pub fn profile_from_layout(layout: &ServiceLayout) -> GattProfile {
    let mut profile = GattProfile::default();

    for (service, characteristics) in layout {
        if *service == DEVICE_INFO_SERVICE_UUID {
            profile.device_information = true;
        }
        if *service != UART_SERVICE_UUID {
            continue;
        }

        profile.uart_service = true;
        for (characteristic, descriptors) in characteristics {
            if *characteristic == UART_TX_CHARACTERISTIC_UUID {
                profile.tx_characteristic = true;
            } else if *characteristic == UART_RX_CHARACTERISTIC_UUID {
                profile.rx_characteristic = true;
                profile.client_config_descriptor =
                    descriptors.contains(&CLIENT_CONFIG_DESCRIPTOR_UUID);
            }
        }
    }
    profile
}

fn layout_of(peripheral: &Peripheral) -> ServiceLayout {
    peripheral
        .services()
        .into_iter()
        .map(|service| {
            let characteristics: Vec<(Uuid, Vec<Uuid>)> = service
                .characteristics
                .into_iter()
                .map(|c| {
                    let descriptors: Vec<Uuid> = c.descriptors.into_iter().map(|d| d.uuid).collect();
                    (c.uuid, descriptors)
                })
                .collect();
            (service.uuid, characteristics)
        })
        .collect()
}

fn select_characteristic<I>(characteristics: I, uuid: Uuid) -> Result<Characteristic>
where
    I: IntoIterator<Item = Characteristic>,
{
    characteristics
        .into_iter()
        .find(|c| c.uuid == uuid)
        .ok_or(BleHostError::CharacteristicNotFound(uuid))
}

/// Generation of each outbound link, advanced whenever the link is opened or torn down
///
/// Operations capture the generation when they are issued; a completion whose
/// generation is stale belongs to a previous link to the same address.
#[derive(Debug, Default)]
pub(crate) struct LinkEpochs {
    epochs: Mutex<HashMap<DeviceAddress, u64>>,
}

impl LinkEpochs {
    pub(crate) fn current(&self, address: DeviceAddress) -> u64 {
        self.epochs.lock().get(&address).copied().unwrap_or(0)
    }

    pub(crate) fn advance(&self, address: DeviceAddress) {
        *self.epochs.lock().entry(address).or_insert(0) += 1;
    }

    pub(crate) fn is_current(&self, address: DeviceAddress, epoch: u64) -> bool {
        self.current(address) == epoch
    }
}

// ----------------------------------------------------------------------------
// Central Host
// ----------------------------------------------------------------------------

/// Drives the engine's client role with a btleplug adapter
pub struct CentralHost {
    adapter: Adapter,
    engine: Arc<DualRoleUart>,
    peripherals: Arc<RwLock<HashMap<DeviceAddress, Peripheral>>>,
    epochs: Arc<LinkEpochs>,
    operation_timeout: Duration,
}

impl CentralHost {
    /// Open the first available adapter
    pub async fn new(engine: Arc<DualRoleUart>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(BleHostError::AdapterNotAvailable)?;

        info!("BLE central adapter initialized");
        let operation_timeout = engine.config().operation_timeout;
        Ok(Self {
            adapter,
            engine,
            peripherals: Arc::new(RwLock::new(HashMap::new())),
            epochs: Arc::new(LinkEpochs::default()),
            operation_timeout,
        })
    }

    /// Serve commands and adapter events until the command channel closes
    pub async fn run(self, mut commands: mpsc::UnboundedReceiver<ClientCommand>) -> Result<()> {
        let mut events = self.adapter.events().await?;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                event = events.next() => match event {
                    Some(event) => self.on_central_event(event).await,
                    None => {
                        warn!("Adapter event stream ended");
                        break;
                    }
                },
            }
        }

        debug!("Central host stopped");
        Ok(())
    }

    async fn peripheral(&self, address: DeviceAddress) -> Option<Peripheral> {
        self.peripherals.read().await.get(&address).cloned()
    }

    /// Known peripheral and one of its discovered characteristics
    async fn locate(&self, address: DeviceAddress, uuid: Uuid) -> Result<(Peripheral, Characteristic)> {
        let peripheral = self
            .peripheral(address)
            .await
            .ok_or(BleHostError::UnknownDevice(address))?;
        let characteristic = select_characteristic(peripheral.characteristics(), uuid)?;
        Ok((peripheral, characteristic))
    }

    async fn resolve(&self, id: &PeripheralId) -> Option<(DeviceAddress, Peripheral)> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let address = DeviceAddress::new(peripheral.address().into_inner());
        self.peripherals
            .write()
            .await
            .entry(address)
            .or_insert_with(|| peripheral.clone());
        Some((address, peripheral))
    }

    // ------------------------------------------------------------------------
    // Adapter Events
    // ------------------------------------------------------------------------

    async fn on_central_event(&self, event: CentralEvent) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let Some((address, peripheral)) = self.resolve(&id).await else {
                    return;
                };
                let Ok(Some(properties)) = peripheral.properties().await else {
                    return;
                };
                if let Some(data) = properties.service_data.get(&UART_SERVICE_UUID) {
                    self.engine.handle_client_event(ClientEvent::AdvertisementSeen {
                        address,
                        service_data: Some(data.clone()),
                    });
                }
            }
            CentralEvent::ServiceDataAdvertisement { id, service_data } => {
                let Some(data) = service_data.get(&UART_SERVICE_UUID) else {
                    return;
                };
                if let Some((address, _)) = self.resolve(&id).await {
                    self.engine.handle_client_event(ClientEvent::AdvertisementSeen {
                        address,
                        service_data: Some(data.clone()),
                    });
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if let Some((address, _)) = self.resolve(&id).await {
                    debug!("Adapter reports {} disconnected", address);
                    self.epochs.advance(address);
                    self.engine.handle_client_event(ClientEvent::ConnectionStateChanged {
                        address,
                        status: LinkStatus::Disconnected,
                    });
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn execute(&self, command: ClientCommand) {
        match command {
            ClientCommand::StartScan { service, mode } => {
                debug!("Scan mode {} left to the platform", mode);
                let filter = ScanFilter {
                    services: vec![service],
                };
                let event = match self.adapter.start_scan(filter).await {
                    Ok(()) => ClientEvent::ScanStarted,
                    Err(e) => ClientEvent::ScanFailed {
                        reason: e.to_string(),
                    },
                };
                self.engine.handle_client_event(event);
            }
            ClientCommand::StopScan => {
                if let Err(e) = self.adapter.stop_scan().await {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            ClientCommand::Connect { address } => self.connect(address).await,
            ClientCommand::Disconnect { address } => {
                self.epochs.advance(address);
                if let Some(peripheral) = self.peripheral(address).await {
                    tokio::spawn(async move {
                        if let Err(e) = peripheral.disconnect().await {
                            warn!("Failed to disconnect {}: {}", address, e);
                        }
                    });
                }
            }
            ClientCommand::RequestMtu { address, mtu } => {
                // btleplug exposes no MTU exchange; the link stays at the default
                debug!("MTU {} requested for {}, reporting {}", mtu, address, DEFAULT_ATT_MTU);
                self.engine.handle_client_event(ClientEvent::MtuChanged {
                    address,
                    mtu: Some(DEFAULT_ATT_MTU),
                });
            }
            ClientCommand::RequestConnectionPriority { address, priority } => {
                debug!("Connection priority {} for {} left to the platform", priority, address);
            }
            ClientCommand::DiscoverServices { address } => self.discover_services(address).await,
            ClientCommand::EnableNotifications { address } => {
                self.enable_notifications(address).await
            }
            ClientCommand::ReadCharacteristic {
                address,
                characteristic,
            } => self.read(address, characteristic).await,
            ClientCommand::WriteCharacteristic {
                address,
                data,
                mode,
            } => self.write(address, data, mode).await,
        }
    }

    async fn connect(&self, address: DeviceAddress) {
        self.epochs.advance(address);
        let Some(peripheral) = self.peripheral(address).await else {
            self.engine.handle_client_event(ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Failed {
                    reason: BleHostError::UnknownDevice(address).to_string(),
                },
            });
            return;
        };

        let engine = self.engine.clone();
        let limit = self.operation_timeout;
        tokio::spawn(async move {
            let status = match bounded(limit, peripheral.connect()).await {
                Ok(()) => LinkStatus::Connected,
                Err(reason) => {
                    error!("Failed to connect to {}: {}", address, reason);
                    LinkStatus::Failed { reason }
                }
            };
            engine.handle_client_event(ClientEvent::ConnectionStateChanged { address, status });
        });
    }

    async fn discover_services(&self, address: DeviceAddress) {
        let Some(peripheral) = self.peripheral(address).await else {
            self.engine.handle_client_event(ClientEvent::ServicesDiscovered {
                address,
                result: Err(BleHostError::UnknownDevice(address).to_string()),
            });
            return;
        };

        let engine = self.engine.clone();
        let limit = self.operation_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, peripheral.discover_services())
                .await
                .map(|()| profile_from_layout(&layout_of(&peripheral)));
            engine.handle_client_event(ClientEvent::ServicesDiscovered { address, result });
        });
    }

    async fn enable_notifications(&self, address: DeviceAddress) {
        let (peripheral, rx) = match self.locate(address, UART_RX_CHARACTERISTIC_UUID).await {
            Ok(target) => target,
            Err(e) => {
                warn!("Cannot subscribe to {}: {}", address, e);
                self.engine.handle_client_event(ClientEvent::DescriptorWritten {
                    address,
                    success: false,
                });
                return;
            }
        };

        let engine = self.engine.clone();
        let limit = self.operation_timeout;
        tokio::spawn(async move {
            if let Err(reason) = bounded(limit, peripheral.subscribe(&rx)).await {
                warn!("Failed to subscribe to {}: {}", address, reason);
                engine.handle_client_event(ClientEvent::DescriptorWritten {
                    address,
                    success: false,
                });
                return;
            }

            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("No notification stream for {}: {}", address, e);
                    engine.handle_client_event(ClientEvent::DescriptorWritten {
                        address,
                        success: false,
                    });
                    return;
                }
            };

            engine.handle_client_event(ClientEvent::DescriptorWritten {
                address,
                success: true,
            });

            while let Some(notification) = notifications.next().await {
                if notification.uuid == UART_RX_CHARACTERISTIC_UUID {
                    engine.handle_client_event(ClientEvent::CharacteristicChanged {
                        address,
                        value: notification.value,
                    });
                }
            }
            debug!("Notification stream for {} ended", address);
        });
    }

    async fn read(&self, address: DeviceAddress, characteristic: Uuid) {
        let (peripheral, target) = match self.locate(address, characteristic).await {
            Ok(target) => target,
            Err(e) => {
                debug!("Cannot read from {}: {}", address, e);
                self.engine.handle_client_event(ClientEvent::CharacteristicRead {
                    address,
                    characteristic,
                    value: None,
                });
                return;
            }
        };

        let engine = self.engine.clone();
        let limit = self.operation_timeout;
        tokio::spawn(async move {
            let value = match bounded(limit, peripheral.read(&target)).await {
                Ok(value) => Some(value),
                Err(reason) => {
                    warn!("Read of {} from {} failed: {}", characteristic, address, reason);
                    None
                }
            };
            engine.handle_client_event(ClientEvent::CharacteristicRead {
                address,
                characteristic,
                value,
            });
        });
    }

    async fn write(&self, address: DeviceAddress, data: Vec<u8>, mode: WriteMode) {
        let (peripheral, tx) = match self.locate(address, UART_TX_CHARACTERISTIC_UUID).await {
            Ok(target) => target,
            Err(e) => {
                error!("Cannot write to {}: {}", address, e);
                self.engine.handle_client_event(ClientEvent::CharacteristicWritten {
                    address,
                    success: false,
                });
                return;
            }
        };

        let write_type = match mode {
            WriteMode::Request => WriteType::WithResponse,
            WriteMode::Command => WriteType::WithoutResponse,
        };
        let engine = self.engine.clone();
        let epochs = self.epochs.clone();
        let epoch = epochs.current(address);
        let limit = self.operation_timeout;
        tokio::spawn(async move {
            let success = match bounded(limit, peripheral.write(&tx, &data, write_type)).await {
                Ok(()) => true,
                Err(reason) => {
                    error!("Write of {} bytes to {} failed: {}", data.len(), address, reason);
                    false
                }
            };
            if !epochs.is_current(address, epoch) {
                debug!("Discarding write completion from a previous link to {}", address);
                return;
            }
            engine.handle_client_event(ClientEvent::CharacteristicWritten { address, success });
        });
    }
}
