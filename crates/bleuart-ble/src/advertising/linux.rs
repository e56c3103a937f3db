//! Linux peripheral using bluer (BlueZ)
//!
//! The UART characteristics use BlueZ's acquired-socket mode: every write
//! from a central arrives on its own reader, and every subscribing central
//! gets its own notification writer. Notifications can therefore be addressed
//! to a single central, which the per-subscriber queue in the engine relies on.

use std::collections::HashMap;
use std::sync::Arc;

use bleuart_core::protocol::{
    DEVICE_INFO_FIRMWARE_UUID, DEVICE_INFO_HARDWARE_UUID, DEVICE_INFO_MANUFACTURER_UUID,
    DEVICE_INFO_MODEL_UUID, DEVICE_INFO_SERVICE_UUID, MAX_ATT_MTU, UART_RX_CHARACTERISTIC_UUID,
    UART_SERVICE_UUID, UART_TX_CHARACTERISTIC_UUID,
};
use bleuart_core::{AdvertisingParameters, DeviceAddress, DualRoleUart, ServerEvent};
use bluer::adv::{Advertisement, AdvertisementHandle};
use bluer::gatt::local::{
    characteristic_control, Application, ApplicationHandle, Characteristic, CharacteristicControl,
    CharacteristicControlEvent, CharacteristicControlHandle, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, CharacteristicWrite,
    CharacteristicWriteMethod, ReqError, Service,
};
use bluer::gatt::CharacteristicWriter;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BleHostError, Result};

use super::PeripheralBackend;

type Subscribers = Arc<Mutex<HashMap<DeviceAddress, mpsc::UnboundedSender<Vec<u8>>>>>;

fn to_device_address(address: bluer::Address) -> DeviceAddress {
    DeviceAddress::new(address.0)
}

fn att_mtu(mtu: usize) -> u16 {
    u16::try_from(mtu).unwrap_or(MAX_ATT_MTU)
}

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct LinuxPeripheral {
    engine: Arc<DualRoleUart>,
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    application: Option<ApplicationHandle>,
    advertisement: Option<AdvertisementHandle>,
    control_tasks: Vec<JoinHandle<()>>,
    subscribers: Subscribers,
}

impl LinuxPeripheral {
    pub fn new(engine: Arc<DualRoleUart>) -> Self {
        Self {
            engine,
            session: None,
            adapter: None,
            application: None,
            advertisement: None,
            control_tasks: Vec::new(),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn initialize(&mut self) -> Result<bluer::Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;

        // Enable adapter if needed
        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await?;
        }

        info!("Linux BLE adapter {} initialized for advertising", adapter.name());
        self.session = Some(session);
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn build_application(
        &self,
        tx_handle: CharacteristicControlHandle,
        rx_handle: CharacteristicControlHandle,
    ) -> Application {
        let uart = Service {
            uuid: UART_SERVICE_UUID,
            primary: true,
            characteristics: vec![
                Characteristic {
                    uuid: UART_TX_CHARACTERISTIC_UUID,
                    write: Some(CharacteristicWrite {
                        write: true,
                        write_without_response: true,
                        method: CharacteristicWriteMethod::Io,
                        ..Default::default()
                    }),
                    control_handle: tx_handle,
                    ..Default::default()
                },
                Characteristic {
                    uuid: UART_RX_CHARACTERISTIC_UUID,
                    notify: Some(CharacteristicNotify {
                        notify: true,
                        method: CharacteristicNotifyMethod::Io,
                        ..Default::default()
                    }),
                    control_handle: rx_handle,
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let device_info = Service {
            uuid: DEVICE_INFO_SERVICE_UUID,
            primary: true,
            characteristics: vec![
                static_characteristic(DEVICE_INFO_MANUFACTURER_UUID, "bleuart"),
                static_characteristic(DEVICE_INFO_MODEL_UUID, std::env::consts::OS),
                static_characteristic(DEVICE_INFO_HARDWARE_UUID, std::env::consts::ARCH),
                static_characteristic(DEVICE_INFO_FIRMWARE_UUID, env!("CARGO_PKG_VERSION")),
            ],
            ..Default::default()
        };

        Application {
            services: vec![uart, device_info],
            ..Default::default()
        }
    }
}

/// Read-only characteristic serving a fixed string
fn static_characteristic(uuid: Uuid, value: &'static str) -> Characteristic {
    Characteristic {
        uuid,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req: CharacteristicReadRequest| {
                async move { Ok::<_, ReqError>(value.as_bytes().to_vec()) }.boxed()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[async_trait::async_trait]
impl PeripheralBackend for LinuxPeripheral {
    async fn start_advertising(
        &mut self,
        service: Uuid,
        service_data: Vec<u8>,
        parameters: AdvertisingParameters,
    ) -> Result<()> {
        if self.is_advertising() {
            self.stop_advertising().await;
        }
        let adapter = self.initialize().await?;

        let (tx_control, tx_handle) = characteristic_control();
        let (rx_control, rx_handle) = characteristic_control();
        let application = self.build_application(tx_handle, rx_handle);
        let application = adapter.serve_gatt_application(application).await?;

        let advertisement_type = if parameters.connectable {
            bluer::adv::Type::Peripheral
        } else {
            bluer::adv::Type::Broadcast
        };
        let advertisement = Advertisement {
            advertisement_type,
            service_uuids: [service].into_iter().collect(),
            service_data: [(service, service_data)].into_iter().collect(),
            local_name: Some(parameters.local_name.clone()),
            discoverable: Some(true),
            min_interval: Some(parameters.interval),
            max_interval: Some(parameters.interval),
            tx_power: Some(parameters.tx_power_dbm),
            ..Default::default()
        };
        let advertisement = adapter.advertise(advertisement).await?;

        self.control_tasks.push(tokio::spawn(serve_writes(
            tx_control,
            self.engine.clone(),
        )));
        self.control_tasks.push(tokio::spawn(serve_subscriptions(
            rx_control,
            self.engine.clone(),
            self.subscribers.clone(),
        )));

        self.application = Some(application);
        self.advertisement = Some(advertisement);
        info!(
            "Started BLE advertising as '{}' every {:?} at {} dBm",
            parameters.local_name, parameters.interval, parameters.tx_power_dbm
        );
        Ok(())
    }

    async fn stop_advertising(&mut self) {
        // Dropping the handles unregisters the advertisement and GATT application
        let was_advertising = self.advertisement.take().is_some();
        self.application = None;
        for task in self.control_tasks.drain(..) {
            task.abort();
        }
        self.subscribers.lock().clear();
        if was_advertising {
            info!("Stopped BLE advertising");
        }
    }

    async fn notify(&mut self, address: DeviceAddress, data: Vec<u8>) {
        let queued = self
            .subscribers
            .lock()
            .get(&address)
            .map(|outbound| outbound.send(data).is_ok())
            .unwrap_or(false);

        if !queued {
            warn!("No notification session for {}", address);
            self.engine.handle_server_event(ServerEvent::NotificationSent {
                address,
                success: false,
            });
        }
    }

    async fn cancel_connection(&mut self, address: DeviceAddress) {
        self.subscribers.lock().remove(&address);

        let Some(adapter) = &self.adapter else {
            return;
        };
        let result = match adapter.device(bluer::Address(*address.as_bytes())) {
            Ok(device) => device.disconnect().await.map_err(BleHostError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to disconnect central {}: {}", address, e);
        }
    }

    fn is_advertising(&self) -> bool {
        self.advertisement.is_some()
    }
}

// ----------------------------------------------------------------------------
// Characteristic Control Loops
// ----------------------------------------------------------------------------

/// Accept every TX write session and forward the written values
async fn serve_writes(control: CharacteristicControl, engine: Arc<DualRoleUart>) {
    let mut control = Box::pin(control);
    while let Some(event) = control.next().await {
        let CharacteristicControlEvent::Write(request) = event else {
            continue;
        };

        let address = to_device_address(request.device_address());
        let mtu = request.mtu();
        engine.handle_server_event(ServerEvent::MtuChanged {
            address,
            mtu: att_mtu(mtu),
        });

        let mut reader = match request.accept() {
            Ok(reader) => reader,
            Err(e) => {
                warn!("Failed to accept write session from {}: {}", address, e);
                continue;
            }
        };

        let engine = engine.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; mtu.max(1)];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        debug!("Write from {}: {} bytes", address, n);
                        engine.handle_server_event(ServerEvent::CharacteristicWriteRequest {
                            address,
                            value: buf[..n].to_vec(),
                        });
                    }
                    Err(e) => {
                        debug!("Write session from {} closed: {}", address, e);
                        break;
                    }
                }
            }
        });
    }
}

/// Register each subscribing central and hand it a dedicated writer task
async fn serve_subscriptions(
    control: CharacteristicControl,
    engine: Arc<DualRoleUart>,
    subscribers: Subscribers,
) {
    let mut control = Box::pin(control);
    while let Some(event) = control.next().await {
        let CharacteristicControlEvent::Notify(writer) = event else {
            continue;
        };

        let address = to_device_address(writer.device_address());
        let (outbound, queued) = mpsc::unbounded_channel();
        subscribers.lock().insert(address, outbound);

        engine.handle_server_event(ServerEvent::ConnectionStateChanged {
            address,
            connected: true,
        });
        engine.handle_server_event(ServerEvent::MtuChanged {
            address,
            mtu: att_mtu(writer.mtu()),
        });
        engine.handle_server_event(ServerEvent::NotificationsChanged {
            address,
            enabled: true,
        });

        tokio::spawn(serve_subscriber(
            address,
            writer,
            queued,
            engine.clone(),
            subscribers.clone(),
        ));
    }
}

async fn serve_subscriber(
    address: DeviceAddress,
    mut writer: CharacteristicWriter,
    mut queued: mpsc::UnboundedReceiver<Vec<u8>>,
    engine: Arc<DualRoleUart>,
    subscribers: Subscribers,
) {
    loop {
        let next = tokio::select! {
            data = queued.recv() => data,
            _ = writer.closed() => None,
        };
        let Some(data) = next else {
            break;
        };

        let success = match writer.write_all(&data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Notification to {} failed: {}", address, e);
                false
            }
        };
        engine.handle_server_event(ServerEvent::NotificationSent { address, success });
        if !success {
            break;
        }
    }

    subscribers.lock().remove(&address);
    engine.handle_server_event(ServerEvent::NotificationsChanged {
        address,
        enabled: false,
    });
    engine.handle_server_event(ServerEvent::ConnectionStateChanged {
        address,
        connected: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_att_mtu_saturates() {
        assert_eq!(att_mtu(185), 185);
        assert_eq!(att_mtu(100_000), MAX_ATT_MTU);
    }

    #[test]
    fn test_address_conversion_keeps_octet_order() {
        let address = to_device_address(bluer::Address([0xAA, 1, 2, 3, 4, 0xFF]));
        assert_eq!(address.to_string(), "AA:01:02:03:04:FF");
    }
}
