//! Client (central) role
//!
//! [`LinkClient`] scans for the UART service, hands sightings to the
//! [`DiscoveryArbiter`], and walks each outbound link through MTU exchange,
//! service discovery, notification subscription and the optional Device
//! Information reads. Every entry point returns a [`Transition`] describing
//! the transport commands to issue and the observer events to raise; nothing
//! here performs I/O.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::channel::{ClientCommand, ClientEvent, GattProfile, LinkStatus, Transition, UartEvent};
use crate::config::EngineConfig;
use crate::device_info::{DeviceInfoReader, DeviceInfoRecord};
use crate::discovery::{DiscoveryArbiter, Verdict};
use crate::errors::UartError;
use crate::peer::{Connection, ConnectionState};
use crate::protocol::{DEFAULT_ATT_MTU, UART_SERVICE_UUID};
use crate::queue::TransferQueue;
use crate::types::{DeviceAddress, LinkRole, PeerIdentity};

type ClientTransition = Transition<ClientCommand>;

// ----------------------------------------------------------------------------
// Client Link
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct ClientLink {
    connection: Connection,
    profile: GattProfile,
    reader: Option<DeviceInfoReader>,
    device_info: Option<DeviceInfoRecord>,
}

impl ClientLink {
    fn new(address: DeviceAddress) -> Self {
        Self {
            connection: Connection::outbound(address),
            profile: GattProfile::default(),
            reader: None,
            device_info: None,
        }
    }

    fn state(&self) -> ConnectionState {
        self.connection.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Idle,
    Starting,
    Scanning,
}

// ----------------------------------------------------------------------------
// Link Client
// ----------------------------------------------------------------------------

/// Central-role state machine
#[derive(Debug)]
pub struct LinkClient {
    config: EngineConfig,
    arbiter: DiscoveryArbiter,
    links: BTreeMap<DeviceAddress, ClientLink>,
    queue: TransferQueue<DeviceAddress>,
    scan: ScanState,
    /// Lowest MTU negotiated on any link, starting at the requested value
    mtu_floor: u16,
    /// Surface the next sighting regardless of the tie-break, then stop scanning
    first_available: bool,
}

impl LinkClient {
    pub fn new(config: EngineConfig, local: PeerIdentity) -> Self {
        let mtu_floor = config.requested_mtu;
        Self {
            config,
            arbiter: DiscoveryArbiter::new(local),
            links: BTreeMap::new(),
            queue: TransferQueue::new(),
            scan: ScanState::Idle,
            mtu_floor,
            first_available: false,
        }
    }

    // ------------------------------------------------------------------------
    // Host API
    // ------------------------------------------------------------------------

    /// Begin continuous scanning filtered to the UART service
    pub fn start_scan(&mut self) -> ClientTransition {
        let mut transition = Transition::new();
        if self.scan != ScanState::Idle {
            debug!("Scan already running");
            return transition;
        }

        info!("Starting scan for UART peripherals");
        self.scan = ScanState::Starting;
        transition.effect(ClientCommand::StartScan {
            service: UART_SERVICE_UUID,
            mode: self.config.scan_mode,
        });
        transition
    }

    /// Stop scanning; connected links are untouched
    pub fn stop_scan(&mut self) -> ClientTransition {
        let mut transition = Transition::new();
        if self.scan == ScanState::Idle {
            return transition;
        }

        info!("Stopping scan");
        self.scan = ScanState::Idle;
        transition.effect(ClientCommand::StopScan);
        transition
    }

    /// Open a link to `address`
    ///
    /// Ignored when a link to the address already exists in any state, so at
    /// most one attempt per address is ever outstanding.
    pub fn connect(&mut self, address: DeviceAddress) -> ClientTransition {
        let mut transition = Transition::new();
        if let Some(link) = self.links.get(&address) {
            debug!("Already {} to {}, ignoring connect", link.state(), address);
            return transition;
        }

        info!("Connecting to {}", address);
        self.links.insert(address, ClientLink::new(address));
        transition.effect(ClientCommand::Connect { address });
        transition
    }

    /// Drop every link, rescan, and surface the first UART advertiser seen
    pub fn connect_first_available(&mut self) -> ClientTransition {
        let mut transition = self.disconnect();
        transition.merge(self.stop_scan());
        self.first_available = true;
        transition.merge(self.start_scan());
        transition
    }

    /// Tear down every link and forget the discovery session
    pub fn disconnect(&mut self) -> ClientTransition {
        let mut transition = Transition::new();
        let links = core::mem::take(&mut self.links);
        if !links.is_empty() {
            info!("Disconnecting {} client links", links.len());
        }

        for (address, link) in links {
            transition.effect(ClientCommand::Disconnect { address });
            if link.connection.is_ready() {
                transition.event(UartEvent::Disconnected {
                    address,
                    role: LinkRole::Client,
                });
            }
        }

        self.queue.clear_all();
        self.arbiter.reset();
        self.first_available = false;
        transition
    }

    /// Queue one chunk for every ready link
    ///
    /// The chunk must already fit the engine MTU.
    pub fn send(&mut self, chunk: &[u8]) -> ClientTransition {
        let mut transition = Transition::new();
        if chunk.is_empty() {
            return transition;
        }

        let mode = self.config.write_mode;
        let ready: Vec<DeviceAddress> = self
            .links
            .values()
            .filter(|link| link.connection.is_ready())
            .map(|link| link.connection.address)
            .collect();

        for address in ready {
            if let Some(dispatch) = self.queue.enqueue(address, chunk.to_vec()) {
                transition.effect(ClientCommand::WriteCharacteristic {
                    address,
                    data: dispatch.payload,
                    mode,
                });
            }
        }
        transition
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn local_identity(&self) -> PeerIdentity {
        self.arbiter.local_identity()
    }

    /// MTU floor across every client link
    pub fn mtu(&self) -> u16 {
        self.mtu_floor
    }

    /// Number of ready links
    pub fn num_connections(&self) -> usize {
        self.links.values().filter(|link| link.connection.is_ready()).count()
    }

    pub fn is_scanning(&self) -> bool {
        self.scan != ScanState::Idle
    }

    pub fn connection(&self, address: &DeviceAddress) -> Option<&Connection> {
        self.links.get(address).map(|link| &link.connection)
    }

    pub fn device_info_for(&self, address: &DeviceAddress) -> Option<&DeviceInfoRecord> {
        self.links.get(address).and_then(|link| link.device_info.as_ref())
    }

    /// Rendered Device Information of the first link that has it, or empty
    pub fn device_info(&self) -> String {
        self.links
            .values()
            .find_map(|link| link.device_info.as_ref())
            .map(|record| record.to_string())
            .unwrap_or_default()
    }

    pub fn in_flight(&self, address: DeviceAddress) -> bool {
        self.queue.is_in_flight(address)
    }

    pub fn pending(&self, address: DeviceAddress) -> usize {
        self.queue.pending(address)
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    /// Feed one transport callback into the state machine
    pub fn handle_event(&mut self, event: ClientEvent, now: Instant) -> ClientTransition {
        match event {
            ClientEvent::ScanStarted => {
                if self.scan == ScanState::Starting {
                    debug!("Scan started");
                    self.scan = ScanState::Scanning;
                }
                Transition::new()
            }
            ClientEvent::ScanFailed { reason } => {
                warn!("Scan failed to start: {}", reason);
                self.scan = ScanState::Idle;
                self.first_available = false;
                let mut transition = Transition::new();
                transition.event(UartEvent::Error {
                    error: UartError::ScanStartFailure { reason },
                });
                transition
            }
            ClientEvent::AdvertisementSeen {
                address,
                service_data,
            } => self.on_advertisement(address, service_data.as_deref(), now),
            ClientEvent::ConnectionStateChanged { address, status } => {
                self.on_connection_state(address, status)
            }
            ClientEvent::MtuChanged { address, mtu } => self.on_mtu_changed(address, mtu),
            ClientEvent::ServicesDiscovered { address, result } => {
                self.on_services_discovered(address, result)
            }
            ClientEvent::DescriptorWritten { address, success } => {
                self.on_descriptor_written(address, success)
            }
            ClientEvent::CharacteristicChanged { address, value } => {
                let mut transition = Transition::new();
                match self.links.get(&address) {
                    Some(link) if link.state().is_subscribed() => {
                        transition.event(UartEvent::Received {
                            address,
                            data: value,
                        });
                    }
                    _ => debug!("Dropping notification from unsubscribed {}", address),
                }
                transition
            }
            ClientEvent::CharacteristicRead {
                address,
                characteristic,
                value,
            } => self.on_characteristic_read(address, characteristic, value),
            ClientEvent::CharacteristicWritten { address, success } => {
                self.on_write_complete(address, success)
            }
        }
    }

    fn on_advertisement(
        &mut self,
        address: DeviceAddress,
        service_data: Option<&[u8]>,
        now: Instant,
    ) -> ClientTransition {
        let mut transition = Transition::new();

        if self.first_available {
            info!("First available UART device: {}", address);
            self.first_available = false;
            transition.event(UartEvent::DeviceFound { address });
            transition.merge(self.stop_scan());
            if self.config.auto_connect {
                transition.merge(self.connect(address));
            }
            return transition;
        }

        if self.links.contains_key(&address) {
            return transition;
        }

        let Some(identity) = service_data.and_then(PeerIdentity::from_bytes) else {
            debug!("Advertisement from {} carries no identity", address);
            return transition;
        };

        if self.arbiter.observe(address, identity, now) != Verdict::Initiate {
            return transition;
        }

        if !self.config.connectable {
            debug!("Not connectable, not surfacing {}", address);
            return transition;
        }

        transition.event(UartEvent::DeviceFound { address });
        if self.config.auto_connect {
            transition.merge(self.connect(address));
        }
        transition
    }

    fn on_connection_state(&mut self, address: DeviceAddress, status: LinkStatus) -> ClientTransition {
        let mut transition = Transition::new();
        match status {
            LinkStatus::Connected => {
                let Some(link) = self.links.get_mut(&address) else {
                    warn!("Unexpected connection to {}, dropping it", address);
                    transition.effect(ClientCommand::Disconnect { address });
                    return transition;
                };
                if link.state() != ConnectionState::Connecting {
                    return transition;
                }

                debug!("Connected to {}, requesting MTU {}", address, self.config.requested_mtu);
                link.connection.advance(ConnectionState::NegotiatingMtu);
                transition.effect(ClientCommand::RequestMtu {
                    address,
                    mtu: self.config.requested_mtu,
                });
            }
            LinkStatus::Failed { reason } => {
                if self.remove_link(address).is_none() {
                    return transition;
                }
                warn!("Connection to {} failed: {}", address, reason);
                transition.event(UartEvent::ConnectFailed {
                    error: UartError::TransportConnectFailure { address, reason },
                });
                if self.links.is_empty() {
                    transition.merge(self.stop_scan());
                }
            }
            LinkStatus::Disconnected => {
                let Some(link) = self.remove_link(address) else {
                    return transition;
                };
                if link.connection.is_ready() {
                    info!("Disconnected from {}", address);
                    transition.event(UartEvent::Disconnected {
                        address,
                        role: LinkRole::Client,
                    });
                } else {
                    warn!("{} dropped while {}", address, link.state());
                    transition.event(UartEvent::ConnectFailed {
                        error: UartError::TransportConnectFailure {
                            address,
                            reason: format!("link dropped while {}", link.state()),
                        },
                    });
                }
            }
        }
        transition
    }

    fn on_mtu_changed(&mut self, address: DeviceAddress, mtu: Option<u16>) -> ClientTransition {
        let mut transition = Transition::new();
        let Some(link) = self.links.get_mut(&address) else {
            return transition;
        };
        if link.state() != ConnectionState::NegotiatingMtu {
            return transition;
        }

        let negotiated = match mtu {
            Some(mtu) => mtu.min(self.config.requested_mtu),
            None => {
                warn!("MTU exchange with {} failed, keeping {}", address, DEFAULT_ATT_MTU);
                DEFAULT_ATT_MTU
            }
        };
        link.connection.mtu = negotiated;
        if negotiated < self.mtu_floor {
            debug!("Client MTU floor {} -> {}", self.mtu_floor, negotiated);
            self.mtu_floor = negotiated;
        }

        let priority = self.config.connection_priority;
        link.connection.priority = Some(priority);
        link.connection.advance(ConnectionState::DiscoveringServices);
        transition.effect(ClientCommand::RequestConnectionPriority { address, priority });
        transition.effect(ClientCommand::DiscoverServices { address });
        transition
    }

    fn on_services_discovered(
        &mut self,
        address: DeviceAddress,
        result: Result<GattProfile, String>,
    ) -> ClientTransition {
        let Some(link) = self.links.get_mut(&address) else {
            return Transition::new();
        };
        if link.state() != ConnectionState::DiscoveringServices {
            return Transition::new();
        }

        let profile = match result {
            Ok(profile) => profile,
            Err(reason) => {
                return self.fail_link(UartError::ServiceDiscoveryFailure { address, reason });
            }
        };

        if let Some(missing) = profile.missing_uart_element() {
            return self.fail_link(UartError::ServiceDiscoveryFailure {
                address,
                reason: format!("{} not found", missing),
            });
        }
        if !profile.client_config_descriptor {
            return self.fail_link(UartError::SubscriptionFailure {
                address,
                reason: "RX characteristic has no client configuration descriptor".to_string(),
            });
        }

        debug!("UART service resolved on {}, enabling notifications", address);
        link.profile = profile;
        link.connection.advance(ConnectionState::SubscribingNotifications);

        let mut transition = Transition::new();
        transition.effect(ClientCommand::EnableNotifications { address });
        transition
    }

    fn on_descriptor_written(&mut self, address: DeviceAddress, success: bool) -> ClientTransition {
        let read_device_info = self.config.read_device_info;
        let Some(link) = self.links.get_mut(&address) else {
            return Transition::new();
        };
        if link.state() != ConnectionState::SubscribingNotifications {
            return Transition::new();
        }

        if !success {
            return self.fail_link(UartError::SubscriptionFailure {
                address,
                reason: "descriptor write rejected".to_string(),
            });
        }

        let mut transition = Transition::new();
        if read_device_info && link.profile.device_information {
            let reader = DeviceInfoReader::new();
            if let Some(characteristic) = reader.next_characteristic() {
                debug!("Reading device information from {}", address);
                link.reader = Some(reader);
                link.connection.advance(ConnectionState::ReadingDeviceInfo);
                transition.effect(ClientCommand::ReadCharacteristic {
                    address,
                    characteristic,
                });
                return transition;
            }
        }

        link.connection.advance(ConnectionState::Ready);
        info!("Client link to {} ready (MTU {})", address, link.connection.mtu);
        transition.event(UartEvent::Connected {
            address,
            role: LinkRole::Client,
        });
        transition
    }

    fn on_characteristic_read(
        &mut self,
        address: DeviceAddress,
        characteristic: uuid::Uuid,
        value: Option<Vec<u8>>,
    ) -> ClientTransition {
        let mut transition = Transition::new();
        let Some(link) = self.links.get_mut(&address) else {
            return transition;
        };
        let Some(reader) = link.reader.as_mut() else {
            return transition;
        };

        if value.is_none() {
            warn!("Failed reading {} from {}", characteristic, address);
        }
        if !reader.accept(characteristic, value.as_deref()) {
            debug!("Unexpected read response {} from {}", characteristic, address);
            return transition;
        }

        if let Some(next) = reader.next_characteristic() {
            transition.effect(ClientCommand::ReadCharacteristic {
                address,
                characteristic: next,
            });
            return transition;
        }

        link.device_info = link.reader.take().and_then(DeviceInfoReader::finish);
        link.connection.advance(ConnectionState::Ready);
        info!("Client link to {} ready with device information", address);
        transition.event(UartEvent::Connected {
            address,
            role: LinkRole::Client,
        });
        transition.event(UartEvent::DeviceInfoAvailable { address });
        transition
    }

    fn on_write_complete(&mut self, address: DeviceAddress, success: bool) -> ClientTransition {
        let mut transition = Transition::new();
        let ready = self
            .links
            .get(&address)
            .is_some_and(|link| link.connection.is_ready());
        if !ready {
            // Left over from an earlier link to the same address
            debug!("Dropping write completion for {} outside a ready link", address);
            return transition;
        }

        let len = self.queue.in_flight_len(address);
        let next = self.queue.complete(address, success);

        if let (false, Some(len)) = (success, len) {
            transition.event(UartEvent::Error {
                error: UartError::TransferFailure { address, len },
            });
        }
        if let Some(dispatch) = next {
            transition.effect(ClientCommand::WriteCharacteristic {
                address,
                data: dispatch.payload,
                mode: self.config.write_mode,
            });
        }
        transition
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn remove_link(&mut self, address: DeviceAddress) -> Option<ClientLink> {
        let link = self.links.remove(&address)?;
        self.queue.clear(address);
        self.arbiter.forget(&address);
        Some(link)
    }

    /// Abandon a link whose setup failed
    fn fail_link(&mut self, error: UartError) -> ClientTransition {
        let mut transition = Transition::new();
        if let Some(address) = error.address() {
            warn!("{}", error);
            self.remove_link(address);
            transition.effect(ClientCommand::Disconnect { address });
        }
        transition.event(UartEvent::ConnectFailed { error });
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteMode;
    use crate::protocol::{DEVICE_INFO_FIRMWARE_UUID, DEVICE_INFO_MANUFACTURER_UUID};

    fn addr(last: u8) -> DeviceAddress {
        DeviceAddress::new([0xAA, 0, 0, 0, 0, last])
    }

    fn client(config: EngineConfig) -> LinkClient {
        LinkClient::new(config, PeerIdentity::new(100))
    }

    fn seen(address: DeviceAddress, identity: u32) -> ClientEvent {
        ClientEvent::AdvertisementSeen {
            address,
            service_data: Some(PeerIdentity::new(identity).to_bytes().to_vec()),
        }
    }

    /// Drive a link from connect to ready
    fn bring_up(client: &mut LinkClient, address: DeviceAddress, mtu: u16) {
        let now = Instant::now();
        client.connect(address);
        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            now,
        );
        client.handle_event(ClientEvent::MtuChanged { address, mtu: Some(mtu) }, now);
        client.handle_event(
            ClientEvent::ServicesDiscovered {
                address,
                result: Ok(GattProfile::uart()),
            },
            now,
        );
        client.handle_event(ClientEvent::DescriptorWritten { address, success: true }, now);
    }

    #[test]
    fn test_setup_sequence() {
        let mut client = client(EngineConfig::new().with_requested_mtu(64));
        let address = addr(1);
        let now = Instant::now();

        let t = client.connect(address);
        assert_eq!(t.effects, vec![ClientCommand::Connect { address }]);
        // Second attempt while outstanding is ignored
        assert!(client.connect(address).is_empty());

        let t = client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            now,
        );
        assert_eq!(t.effects, vec![ClientCommand::RequestMtu { address, mtu: 64 }]);

        let t = client.handle_event(ClientEvent::MtuChanged { address, mtu: Some(23) }, now);
        assert_eq!(t.effects.len(), 2);
        assert!(matches!(t.effects[0], ClientCommand::RequestConnectionPriority { .. }));
        assert_eq!(t.effects[1], ClientCommand::DiscoverServices { address });
        assert_eq!(client.mtu(), 23);

        let t = client.handle_event(
            ClientEvent::ServicesDiscovered {
                address,
                result: Ok(GattProfile::uart()),
            },
            now,
        );
        assert_eq!(t.effects, vec![ClientCommand::EnableNotifications { address }]);
        assert_eq!(client.num_connections(), 0);

        let t = client.handle_event(ClientEvent::DescriptorWritten { address, success: true }, now);
        assert_eq!(
            t.events,
            vec![UartEvent::Connected {
                address,
                role: LinkRole::Client
            }]
        );
        assert_eq!(client.num_connections(), 1);
    }

    #[test]
    fn test_tie_break_surfaces_only_smaller_peers() {
        let mut client = client(EngineConfig::new());
        let now = Instant::now();

        let t = client.handle_event(seen(addr(1), 42), now);
        assert_eq!(t.events, vec![UartEvent::DeviceFound { address: addr(1) }]);
        assert!(t.effects.is_empty());

        let t = client.handle_event(seen(addr(2), 500), now);
        assert!(t.is_empty());

        // Repeated sighting is not re-surfaced
        assert!(client.handle_event(seen(addr(1), 42), now).is_empty());
    }

    #[test]
    fn test_own_identity_never_connected() {
        let mut client = client(EngineConfig::new().with_auto_connect(true));
        let t = client.handle_event(seen(addr(1), 100), Instant::now());
        assert!(t.is_empty());
        assert!(client.connection(&addr(1)).is_none());
    }

    #[test]
    fn test_auto_connect_and_not_connectable() {
        let mut auto = client(EngineConfig::new().with_auto_connect(true));
        let t = auto.handle_event(seen(addr(1), 1), Instant::now());
        assert_eq!(t.effects, vec![ClientCommand::Connect { address: addr(1) }]);

        let mut quiet = client(EngineConfig::new().with_connectable(false));
        assert!(quiet.handle_event(seen(addr(1), 1), Instant::now()).is_empty());
    }

    #[test]
    fn test_missing_identity_ignored() {
        let mut client = client(EngineConfig::new());
        let t = client.handle_event(
            ClientEvent::AdvertisementSeen {
                address: addr(1),
                service_data: Some(vec![1, 2]),
            },
            Instant::now(),
        );
        assert!(t.is_empty());
    }

    #[test]
    fn test_connect_failure_stops_scan_when_alone() {
        let mut client = client(EngineConfig::new());
        let now = Instant::now();
        client.start_scan();
        client.handle_event(ClientEvent::ScanStarted, now);
        client.connect(addr(1));

        let t = client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address: addr(1),
                status: LinkStatus::Failed {
                    reason: "timeout".into(),
                },
            },
            now,
        );
        assert!(matches!(
            t.events[0],
            UartEvent::ConnectFailed {
                error: UartError::TransportConnectFailure { .. }
            }
        ));
        assert_eq!(t.effects, vec![ClientCommand::StopScan]);
        assert!(!client.is_scanning());
        // A retry is possible
        assert!(!client.connect(addr(1)).is_empty());
    }

    #[test]
    fn test_missing_service_fails_link() {
        let mut client = client(EngineConfig::new());
        let address = addr(1);
        let now = Instant::now();
        client.connect(address);
        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            now,
        );
        client.handle_event(ClientEvent::MtuChanged { address, mtu: None }, now);

        let profile = GattProfile {
            tx_characteristic: false,
            ..GattProfile::uart()
        };
        let t = client.handle_event(
            ClientEvent::ServicesDiscovered {
                address,
                result: Ok(profile),
            },
            now,
        );
        assert_eq!(t.effects, vec![ClientCommand::Disconnect { address }]);
        assert!(matches!(
            t.events[0],
            UartEvent::ConnectFailed {
                error: UartError::ServiceDiscoveryFailure { .. }
            }
        ));
        assert!(client.connection(&address).is_none());
        assert_eq!(client.mtu(), DEFAULT_ATT_MTU);
    }

    #[test]
    fn test_missing_descriptor_is_subscription_failure() {
        let mut client = client(EngineConfig::new());
        let address = addr(1);
        let now = Instant::now();
        client.connect(address);
        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            now,
        );
        client.handle_event(ClientEvent::MtuChanged { address, mtu: Some(100) }, now);

        let profile = GattProfile {
            client_config_descriptor: false,
            ..GattProfile::uart()
        };
        let t = client.handle_event(
            ClientEvent::ServicesDiscovered {
                address,
                result: Ok(profile),
            },
            now,
        );
        assert!(matches!(
            t.events[0],
            UartEvent::ConnectFailed {
                error: UartError::SubscriptionFailure { .. }
            }
        ));
    }

    #[test]
    fn test_device_info_read_sequence() {
        let mut client = client(EngineConfig::new().with_device_info(true));
        let address = addr(1);
        let now = Instant::now();
        client.connect(address);
        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            now,
        );
        client.handle_event(ClientEvent::MtuChanged { address, mtu: Some(185) }, now);
        client.handle_event(
            ClientEvent::ServicesDiscovered {
                address,
                result: Ok(GattProfile::uart_with_device_info()),
            },
            now,
        );

        let t = client.handle_event(ClientEvent::DescriptorWritten { address, success: true }, now);
        assert_eq!(
            t.effects,
            vec![ClientCommand::ReadCharacteristic {
                address,
                characteristic: DEVICE_INFO_MANUFACTURER_UUID
            }]
        );
        assert!(t.events.is_empty());

        let mut last = Transition::new();
        for characteristic in crate::device_info::READ_ORDER {
            let value = (characteristic == DEVICE_INFO_FIRMWARE_UUID).then(|| b"2.0".to_vec());
            last = client.handle_event(
                ClientEvent::CharacteristicRead {
                    address,
                    characteristic,
                    value,
                },
                now,
            );
        }

        assert_eq!(
            last.events,
            vec![
                UartEvent::Connected {
                    address,
                    role: LinkRole::Client
                },
                UartEvent::DeviceInfoAvailable { address },
            ]
        );
        assert_eq!(client.device_info_for(&address).unwrap().firmware_revision, "2.0");
        assert!(client.device_info().contains("Firmware     : 2.0"));
    }

    #[test]
    fn test_write_queue_single_flight() {
        let mut client = client(EngineConfig::new().with_write_mode(WriteMode::Command));
        let address = addr(1);
        bring_up(&mut client, address, 23);

        let t = client.send(b"one");
        assert_eq!(
            t.effects,
            vec![ClientCommand::WriteCharacteristic {
                address,
                data: b"one".to_vec(),
                mode: WriteMode::Command
            }]
        );
        assert!(client.send(b"two").is_empty());
        assert_eq!(client.pending(address), 1);

        let t = client.handle_event(
            ClientEvent::CharacteristicWritten {
                address,
                success: false,
            },
            Instant::now(),
        );
        assert!(matches!(
            t.events[0],
            UartEvent::Error {
                error: UartError::TransferFailure { len: 3, .. }
            }
        ));
        assert!(matches!(
            &t.effects[0],
            ClientCommand::WriteCharacteristic { data, .. } if data == b"two"
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut client = client(EngineConfig::new());
        bring_up(&mut client, addr(1), 23);
        client.connect(addr(2));
        client.send(b"queued");

        let t = client.disconnect();
        assert_eq!(t.effects.len(), 2);
        assert_eq!(
            t.events,
            vec![UartEvent::Disconnected {
                address: addr(1),
                role: LinkRole::Client
            }]
        );
        assert!(!client.in_flight(addr(1)));
        assert!(client.disconnect().is_empty());
        assert_eq!(client.num_connections(), 0);
    }

    #[test]
    fn test_connect_first_available_ignores_tie_break() {
        let mut client = client(EngineConfig::new());
        let now = Instant::now();
        let t = client.connect_first_available();
        assert!(t.effects.iter().any(|c| matches!(c, ClientCommand::StartScan { .. })));
        client.handle_event(ClientEvent::ScanStarted, now);

        // Larger identity would normally defer
        let t = client.handle_event(seen(addr(1), 900), now);
        assert_eq!(t.events, vec![UartEvent::DeviceFound { address: addr(1) }]);
        assert_eq!(t.effects, vec![ClientCommand::StopScan]);

        // Only the first sighting is surfaced
        assert!(client.handle_event(seen(addr(2), 901), now).is_empty());
    }

    #[test]
    fn test_scan_failure_reported() {
        let mut client = client(EngineConfig::new());
        client.start_scan();
        let t = client.handle_event(
            ClientEvent::ScanFailed {
                reason: "adapter off".into(),
            },
            Instant::now(),
        );
        assert!(matches!(
            t.events[0],
            UartEvent::Error {
                error: UartError::ScanStartFailure { .. }
            }
        ));
        assert!(!client.is_scanning());
        assert!(!client.start_scan().is_empty());
    }

    #[test]
    fn test_remote_disconnect_raises_once() {
        let mut client = client(EngineConfig::new());
        let address = addr(1);
        bring_up(&mut client, address, 23);

        let disconnected = ClientEvent::ConnectionStateChanged {
            address,
            status: LinkStatus::Disconnected,
        };
        let t = client.handle_event(disconnected.clone(), Instant::now());
        assert_eq!(t.events.len(), 1);
        assert!(client.handle_event(disconnected, Instant::now()).is_empty());
    }

    #[test]
    fn test_late_write_completion_ignored_during_reconnect() {
        let mut client = client(EngineConfig::new());
        let address = addr(1);
        bring_up(&mut client, address, 23);
        client.send(b"stalled");

        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Disconnected,
            },
            Instant::now(),
        );
        client.connect(address);
        client.handle_event(
            ClientEvent::ConnectionStateChanged {
                address,
                status: LinkStatus::Connected,
            },
            Instant::now(),
        );

        let t = client.handle_event(
            ClientEvent::CharacteristicWritten {
                address,
                success: false,
            },
            Instant::now(),
        );
        assert!(t.is_empty());
        assert!(!client.in_flight(address));
    }
}
