//! Server (peripheral) role
//!
//! [`LinkServer`] owns the local UART service and its advertisement. A central
//! counts as connected once it subscribes to the RX characteristic, not when the
//! raw transport link comes up. Outbound data is fanned out as one notification
//! queue per subscriber.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::channel::{AdvertisingParameters, ServerCommand, ServerEvent, Transition, UartEvent};
use crate::config::EngineConfig;
use crate::errors::UartError;
use crate::peer::Connection;
use crate::protocol::{parse_neighbor_list, DEFAULT_ATT_MTU, UART_SERVICE_UUID};
use crate::queue::TransferQueue;
use crate::types::{DeviceAddress, LinkRole, PeerIdentity};

type ServerTransition = Transition<ServerCommand>;

/// Advertising lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingState {
    Idle,
    Starting,
    Advertising,
}

/// Peripheral-role state machine
#[derive(Debug)]
pub struct LinkServer {
    config: EngineConfig,
    identity: PeerIdentity,
    state: AdvertisingState,
    /// MTU of raw links that have not subscribed yet
    links: BTreeMap<DeviceAddress, u16>,
    subscribers: BTreeMap<DeviceAddress, Connection>,
    queue: TransferQueue<DeviceAddress>,
    mtu_floor: u16,
}

impl LinkServer {
    pub fn new(config: EngineConfig, identity: PeerIdentity) -> Self {
        let mtu_floor = config.requested_mtu;
        Self {
            config,
            identity,
            state: AdvertisingState::Idle,
            links: BTreeMap::new(),
            subscribers: BTreeMap::new(),
            queue: TransferQueue::new(),
            mtu_floor,
        }
    }

    /// Serve the UART service and advertise the local identity
    pub fn start(&mut self) -> ServerTransition {
        let mut transition = Transition::new();
        if self.state != AdvertisingState::Idle {
            debug!("Advertising already {:?}", self.state);
            return transition;
        }

        info!("Starting advertising as {}", self.identity);
        self.state = AdvertisingState::Starting;
        transition.effect(ServerCommand::StartAdvertising {
            service: UART_SERVICE_UUID,
            service_data: self.identity.to_bytes().to_vec(),
            parameters: self.advertising_parameters(),
        });
        transition
    }

    /// Stop advertising and release every subscriber
    pub fn stop(&mut self) -> ServerTransition {
        let mut transition = Transition::new();
        if self.state != AdvertisingState::Idle {
            info!("Stopping advertising");
            transition.effect(ServerCommand::StopAdvertising);
        }
        self.state = AdvertisingState::Idle;

        for address in core::mem::take(&mut self.subscribers).into_keys() {
            transition.effect(ServerCommand::CancelConnection { address });
            transition.event(UartEvent::Disconnected {
                address,
                role: LinkRole::Server,
            });
        }
        self.links.clear();
        self.queue.clear_all();
        transition
    }

    /// Queue one notification per subscriber
    ///
    /// The chunk must already fit the engine MTU.
    pub fn send(&mut self, chunk: &[u8]) -> ServerTransition {
        let mut transition = Transition::new();
        if chunk.is_empty() {
            return transition;
        }

        let targets: Vec<DeviceAddress> = self.subscribers.keys().copied().collect();
        for address in targets {
            if let Some(dispatch) = self.queue.enqueue(address, chunk.to_vec()) {
                transition.effect(ServerCommand::Notify {
                    address,
                    data: dispatch.payload,
                });
            }
        }
        transition
    }

    pub fn state(&self) -> AdvertisingState {
        self.state
    }

    pub fn mtu(&self) -> u16 {
        self.mtu_floor
    }

    /// Number of subscribed centrals
    pub fn num_connections(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_registered(&self, address: &DeviceAddress) -> bool {
        self.subscribers.contains_key(address)
    }

    pub fn subscriber(&self, address: &DeviceAddress) -> Option<&Connection> {
        self.subscribers.get(address)
    }

    pub fn in_flight(&self, address: DeviceAddress) -> bool {
        self.queue.is_in_flight(address)
    }

    pub fn pending(&self, address: DeviceAddress) -> usize {
        self.queue.pending(address)
    }

    fn advertising_parameters(&self) -> AdvertisingParameters {
        AdvertisingParameters {
            interval: self.config.advertise_mode.interval(),
            tx_power_dbm: self.config.advertise_tx_power.dbm(),
            connectable: true,
            local_name: self.config.device_name.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    pub fn handle_event(&mut self, event: ServerEvent) -> ServerTransition {
        let mut transition = Transition::new();
        match event {
            ServerEvent::AdvertisingStarted => {
                if self.state == AdvertisingState::Starting {
                    info!("Advertising started");
                    self.state = AdvertisingState::Advertising;
                }
            }
            ServerEvent::AdvertisingFailed { reason } => {
                warn!("Advertising failed to start: {}", reason);
                self.state = AdvertisingState::Idle;
                transition.event(UartEvent::Error {
                    error: UartError::AdvertiseStartFailure { reason },
                });
            }
            ServerEvent::ConnectionStateChanged { address, connected } => {
                if connected {
                    debug!("Central {} connected", address);
                    self.links.entry(address).or_insert(DEFAULT_ATT_MTU);
                } else {
                    self.links.remove(&address);
                    transition.merge(self.release(address));
                }
            }
            ServerEvent::NotificationsChanged { address, enabled } => {
                if enabled {
                    transition.merge(self.register(address));
                } else {
                    transition.merge(self.release(address));
                }
            }
            ServerEvent::CharacteristicWriteRequest { address, value } => {
                transition.merge(self.on_write(address, value));
            }
            ServerEvent::NotificationSent { address, success } => {
                let len = self.queue.in_flight_len(address);
                let next = self.queue.complete(address, success);
                if let (false, Some(len)) = (success, len) {
                    transition.event(UartEvent::Error {
                        error: UartError::TransferFailure { address, len },
                    });
                }
                if let Some(dispatch) = next {
                    transition.effect(ServerCommand::Notify {
                        address,
                        data: dispatch.payload,
                    });
                }
            }
            ServerEvent::MtuChanged { address, mtu } => {
                if let Some(link_mtu) = self.links.get_mut(&address) {
                    *link_mtu = mtu;
                }
                if let Some(connection) = self.subscribers.get_mut(&address) {
                    connection.mtu = mtu;
                }
                if mtu < self.mtu_floor {
                    debug!("Server MTU floor {} -> {}", self.mtu_floor, mtu);
                    self.mtu_floor = mtu;
                }
            }
        }
        transition
    }

    fn register(&mut self, address: DeviceAddress) -> ServerTransition {
        let mut transition = Transition::new();
        if self.state == AdvertisingState::Idle {
            debug!("Ignoring subscription from {} while stopped", address);
            return transition;
        }
        if self.subscribers.contains_key(&address) {
            return transition;
        }

        let mtu = self.links.get(&address).copied().unwrap_or(DEFAULT_ATT_MTU);
        if mtu < self.mtu_floor {
            debug!("Server MTU floor {} -> {}", self.mtu_floor, mtu);
            self.mtu_floor = mtu;
        }
        info!("Central {} subscribed", address);
        self.subscribers
            .insert(address, Connection::subscriber(address, mtu));
        transition.event(UartEvent::Connected {
            address,
            role: LinkRole::Server,
        });
        transition
    }

    fn release(&mut self, address: DeviceAddress) -> ServerTransition {
        let mut transition = Transition::new();
        if self.subscribers.remove(&address).is_none() {
            return transition;
        }

        info!("Central {} unsubscribed", address);
        self.queue.clear(address);
        transition.event(UartEvent::Disconnected {
            address,
            role: LinkRole::Server,
        });
        transition
    }

    fn on_write(&mut self, address: DeviceAddress, value: Vec<u8>) -> ServerTransition {
        let mut transition = Transition::new();

        if let Some(neighbors) = parse_neighbor_list(&value) {
            if !neighbors.iter().any(|n| self.subscribers.contains_key(n)) {
                debug!("{} advertised {} unreached neighbors", address, neighbors.len());
                for neighbor in neighbors {
                    transition.event(UartEvent::DeviceFound { address: neighbor });
                }
                return transition;
            }
        }

        transition.event(UartEvent::Received {
            address,
            data: value,
        });
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdvertiseMode, AdvertiseTxPower};
    use crate::protocol::encode_neighbor_list;

    fn addr(last: u8) -> DeviceAddress {
        DeviceAddress::new([0xBB, 0, 0, 0, 0, last])
    }

    fn advertising_server() -> LinkServer {
        let mut server = LinkServer::new(EngineConfig::new(), PeerIdentity::new(100));
        server.start();
        server.handle_event(ServerEvent::AdvertisingStarted);
        server
    }

    fn subscribe(server: &mut LinkServer, address: DeviceAddress) -> ServerTransition {
        server.handle_event(ServerEvent::ConnectionStateChanged {
            address,
            connected: true,
        });
        server.handle_event(ServerEvent::NotificationsChanged {
            address,
            enabled: true,
        })
    }

    #[test]
    fn test_start_advertises_identity() {
        let config = EngineConfig::new()
            .with_advertise_mode(AdvertiseMode::Balanced)
            .with_advertise_tx_power(AdvertiseTxPower::Low);
        let mut server = LinkServer::new(config, PeerIdentity::new(0x0A0B0C0D));

        let t = server.start();
        match &t.effects[0] {
            ServerCommand::StartAdvertising {
                service,
                service_data,
                parameters,
            } => {
                assert_eq!(*service, UART_SERVICE_UUID);
                assert_eq!(service_data, &vec![0x0A, 0x0B, 0x0C, 0x0D]);
                assert_eq!(parameters.tx_power_dbm, -15);
                assert_eq!(parameters.interval, AdvertiseMode::Balanced.interval());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(server.state(), AdvertisingState::Starting);
        assert!(server.start().is_empty());
    }

    #[test]
    fn test_advertising_failure_returns_to_idle() {
        let mut server = LinkServer::new(EngineConfig::new(), PeerIdentity::new(1));
        server.start();
        let t = server.handle_event(ServerEvent::AdvertisingFailed {
            reason: "too many advertisers".into(),
        });
        assert!(matches!(
            t.events[0],
            UartEvent::Error {
                error: UartError::AdvertiseStartFailure { .. }
            }
        ));
        assert_eq!(server.state(), AdvertisingState::Idle);
        assert!(!server.start().is_empty());
    }

    #[test]
    fn test_subscription_is_connection() {
        let mut server = advertising_server();
        let t = server.handle_event(ServerEvent::ConnectionStateChanged {
            address: addr(1),
            connected: true,
        });
        assert!(t.is_empty());
        assert_eq!(server.num_connections(), 0);

        let t = server.handle_event(ServerEvent::NotificationsChanged {
            address: addr(1),
            enabled: true,
        });
        assert_eq!(
            t.events,
            vec![UartEvent::Connected {
                address: addr(1),
                role: LinkRole::Server
            }]
        );
        assert_eq!(server.num_connections(), 1);

        let t = server.handle_event(ServerEvent::NotificationsChanged {
            address: addr(1),
            enabled: false,
        });
        assert_eq!(
            t.events,
            vec![UartEvent::Disconnected {
                address: addr(1),
                role: LinkRole::Server
            }]
        );
        // Raw disconnect afterwards raises nothing further
        let t = server.handle_event(ServerEvent::ConnectionStateChanged {
            address: addr(1),
            connected: false,
        });
        assert!(t.is_empty());
    }

    #[test]
    fn test_notification_fan_out() {
        let mut server = advertising_server();
        subscribe(&mut server, addr(1));
        subscribe(&mut server, addr(2));

        let t = server.send(b"hi");
        assert_eq!(t.effects.len(), 2);
        assert!(server.send(b"again").is_empty());
        assert_eq!(server.pending(addr(1)), 1);
        assert_eq!(server.pending(addr(2)), 1);

        let t = server.handle_event(ServerEvent::NotificationSent {
            address: addr(2),
            success: true,
        });
        assert_eq!(
            t.effects,
            vec![ServerCommand::Notify {
                address: addr(2),
                data: b"again".to_vec()
            }]
        );
        assert_eq!(server.pending(addr(1)), 1);
    }

    #[test]
    fn test_neighbor_list_surfaces_unknown_peers() {
        let mut server = advertising_server();
        subscribe(&mut server, addr(1));

        let far = DeviceAddress::new([0xCC, 0, 0, 0, 0, 9]);
        let t = server.handle_event(ServerEvent::CharacteristicWriteRequest {
            address: addr(1),
            value: encode_neighbor_list(&[far]),
        });
        assert_eq!(t.events, vec![UartEvent::DeviceFound { address: far }]);

        // A list naming a registered peer is plain data
        let value = encode_neighbor_list(&[far, addr(1)]);
        let t = server.handle_event(ServerEvent::CharacteristicWriteRequest {
            address: addr(1),
            value: value.clone(),
        });
        assert_eq!(
            t.events,
            vec![UartEvent::Received {
                address: addr(1),
                data: value
            }]
        );

        let t = server.handle_event(ServerEvent::CharacteristicWriteRequest {
            address: addr(1),
            value: b"hello".to_vec(),
        });
        assert!(matches!(&t.events[0], UartEvent::Received { data, .. } if data == b"hello"));
    }

    #[test]
    fn test_mtu_floor_only_decreases() {
        let mut server = LinkServer::new(EngineConfig::new().with_requested_mtu(64), PeerIdentity::new(1));
        assert_eq!(server.mtu(), 64);
        server.handle_event(ServerEvent::MtuChanged {
            address: addr(1),
            mtu: 185,
        });
        assert_eq!(server.mtu(), 64);
        server.handle_event(ServerEvent::MtuChanged {
            address: addr(1),
            mtu: 23,
        });
        server.handle_event(ServerEvent::MtuChanged {
            address: addr(2),
            mtu: 100,
        });
        assert_eq!(server.mtu(), 23);
    }

    #[test]
    fn test_subscriber_without_mtu_exchange_lowers_floor() {
        let mut server = advertising_server();
        assert_eq!(server.mtu(), EngineConfig::new().requested_mtu);

        subscribe(&mut server, addr(1));
        assert_eq!(server.subscriber(&addr(1)).map(|c| c.mtu), Some(DEFAULT_ATT_MTU));
        assert_eq!(server.mtu(), DEFAULT_ATT_MTU);
    }

    #[test]
    fn test_stop_releases_subscribers() {
        let mut server = advertising_server();
        subscribe(&mut server, addr(1));
        server.send(b"x");
        server.send(b"y");

        let t = server.stop();
        assert_eq!(
            t.effects,
            vec![
                ServerCommand::StopAdvertising,
                ServerCommand::CancelConnection { address: addr(1) },
            ]
        );
        assert_eq!(t.events.len(), 1);
        assert!(!server.in_flight(addr(1)));
        assert!(server.stop().is_empty());

        // Late subscription after stop is ignored
        assert!(subscribe(&mut server, addr(2)).is_empty());
    }
}
