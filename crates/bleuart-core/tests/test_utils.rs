//! Test utilities for driving the engine without a Bluetooth stack
//!
//! Recording drivers capture every command the engine issues and a recording
//! observer captures every notification, so scenarios can be replayed
//! deterministically from the test thread.

#![allow(dead_code)]

use std::sync::Arc;

use bleuart_core::{
    ClientCommand, ClientDriver, ClientEvent, DeviceAddress, DualRoleUart, EngineConfig,
    GattProfile, LinkRole, LinkStatus, PeerIdentity, ServerCommand, ServerDriver, ServerEvent,
    UartError, UartObserver,
};
use parking_lot::Mutex;

// ----------------------------------------------------------------------------
// Recording Drivers
// ----------------------------------------------------------------------------

/// Client driver that only records
#[derive(Default)]
pub struct RecordingClientDriver {
    commands: Mutex<Vec<ClientCommand>>,
}

impl RecordingClientDriver {
    pub fn take(&self) -> Vec<ClientCommand> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Payloads of every TX write issued so far, in order
    pub fn writes_to(&self, target: DeviceAddress) -> Vec<Vec<u8>> {
        self.commands
            .lock()
            .iter()
            .filter_map(|command| match command {
                ClientCommand::WriteCharacteristic { address, data, .. } if *address == target => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl ClientDriver for RecordingClientDriver {
    fn submit(&self, command: ClientCommand) {
        self.commands.lock().push(command);
    }
}

/// Server driver that only records
#[derive(Default)]
pub struct RecordingServerDriver {
    commands: Mutex<Vec<ServerCommand>>,
}

impl RecordingServerDriver {
    pub fn take(&self) -> Vec<ServerCommand> {
        std::mem::take(&mut *self.commands.lock())
    }

    /// Payloads of every notification issued so far, in order
    pub fn notifications_to(&self, target: DeviceAddress) -> Vec<Vec<u8>> {
        self.commands
            .lock()
            .iter()
            .filter_map(|command| match command {
                ServerCommand::Notify { address, data } if *address == target => {
                    Some(data.clone())
                }
                _ => None,
            })
            .collect()
    }
}

impl ServerDriver for RecordingServerDriver {
    fn submit(&self, command: ServerCommand) {
        self.commands.lock().push(command);
    }
}

// ----------------------------------------------------------------------------
// Recording Observer
// ----------------------------------------------------------------------------

/// One observer callback as seen by the test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observed {
    Connected(DeviceAddress, LinkRole),
    ConnectFailed(UartError),
    Disconnected(DeviceAddress, LinkRole),
    Received(DeviceAddress, Vec<u8>),
    DeviceFound(DeviceAddress),
    DeviceInfoAvailable(DeviceAddress),
    Error(UartError),
}

#[derive(Default)]
pub struct RecordingObserver {
    seen: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<Observed> {
        self.seen.lock().clone()
    }

    pub fn take(&self) -> Vec<Observed> {
        std::mem::take(&mut *self.seen.lock())
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl UartObserver for RecordingObserver {
    fn on_connected(&self, address: DeviceAddress, role: LinkRole) {
        self.seen.lock().push(Observed::Connected(address, role));
    }

    fn on_connect_failed(&self, error: &UartError) {
        self.seen.lock().push(Observed::ConnectFailed(error.clone()));
    }

    fn on_disconnected(&self, address: DeviceAddress, role: LinkRole) {
        self.seen.lock().push(Observed::Disconnected(address, role));
    }

    fn on_receive(&self, address: DeviceAddress, data: &[u8]) {
        self.seen.lock().push(Observed::Received(address, data.to_vec()));
    }

    fn on_device_found(&self, address: DeviceAddress) {
        self.seen.lock().push(Observed::DeviceFound(address));
    }

    fn on_device_info_available(&self, address: DeviceAddress) {
        self.seen.lock().push(Observed::DeviceInfoAvailable(address));
    }

    fn on_error(&self, error: &UartError) {
        self.seen.lock().push(Observed::Error(error.clone()));
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

pub struct TestEngine {
    pub engine: DualRoleUart,
    pub client: Arc<RecordingClientDriver>,
    pub server: Arc<RecordingServerDriver>,
}

pub fn create_test_engine(config: EngineConfig, identity: u32) -> TestEngine {
    let client = Arc::new(RecordingClientDriver::default());
    let server = Arc::new(RecordingServerDriver::default());
    let engine = DualRoleUart::new(
        config,
        PeerIdentity::new(identity),
        client.clone(),
        server.clone(),
    )
    .expect("test config should be valid");

    TestEngine {
        engine,
        client,
        server,
    }
}

pub fn test_address(last: u8) -> DeviceAddress {
    DeviceAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
}

pub fn advertisement(address: DeviceAddress, identity: u32) -> ClientEvent {
    ClientEvent::AdvertisementSeen {
        address,
        service_data: Some(PeerIdentity::new(identity).to_bytes().to_vec()),
    }
}

/// Walk a client link through connect, MTU exchange, discovery and subscription
pub fn bring_up_client_link(engine: &DualRoleUart, address: DeviceAddress, offered_mtu: u16) {
    engine.connect(address);
    engine.handle_client_event(ClientEvent::ConnectionStateChanged {
        address,
        status: LinkStatus::Connected,
    });
    engine.handle_client_event(ClientEvent::MtuChanged {
        address,
        mtu: Some(offered_mtu),
    });
    engine.handle_client_event(ClientEvent::ServicesDiscovered {
        address,
        result: Ok(GattProfile::uart()),
    });
    engine.handle_client_event(ClientEvent::DescriptorWritten {
        address,
        success: true,
    });
}

/// Connect a central to the local peripheral and subscribe it
pub fn subscribe_central(engine: &DualRoleUart, address: DeviceAddress) {
    engine.handle_server_event(ServerEvent::ConnectionStateChanged {
        address,
        connected: true,
    });
    engine.handle_server_event(ServerEvent::NotificationsChanged {
        address,
        enabled: true,
    });
}
