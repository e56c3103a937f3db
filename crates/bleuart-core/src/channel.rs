//! Events consumed and effects produced by the role state machines
//!
//! The engine never touches a Bluetooth stack. Host bindings translate stack
//! callbacks into [`ClientEvent`]/[`ServerEvent`] values, feed them to the
//! coordinator, and execute the [`ClientCommand`]/[`ServerCommand`] values it
//! hands back. Observer notifications travel separately as [`UartEvent`]s.

use std::time::Duration;

use uuid::Uuid;

use crate::config::{ConnectionPriority, ScanMode, WriteMode};
use crate::errors::UartError;
use crate::types::{DeviceAddress, LinkRole};

// ----------------------------------------------------------------------------
// Client (Central) Channel
// ----------------------------------------------------------------------------

/// Outcome of a transport connection attempt or teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    Failed { reason: String },
    Disconnected,
}

/// What service discovery found on a remote device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GattProfile {
    pub uart_service: bool,
    pub tx_characteristic: bool,
    pub rx_characteristic: bool,
    pub client_config_descriptor: bool,
    pub device_information: bool,
}

impl GattProfile {
    /// Profile of a complete UART peripheral
    pub fn uart() -> Self {
        Self {
            uart_service: true,
            tx_characteristic: true,
            rx_characteristic: true,
            client_config_descriptor: true,
            device_information: false,
        }
    }

    /// Profile of a complete UART peripheral exposing Device Information
    pub fn uart_with_device_info() -> Self {
        Self {
            device_information: true,
            ..Self::uart()
        }
    }

    /// Name of the first missing UART element, if any
    pub fn missing_uart_element(&self) -> Option<&'static str> {
        if !self.uart_service {
            Some("UART service")
        } else if !self.tx_characteristic {
            Some("TX characteristic")
        } else if !self.rx_characteristic {
            Some("RX characteristic")
        } else {
            None
        }
    }
}

/// Transport callbacks delivered to the client role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Scanning began
    ScanStarted,
    /// Scanning could not start
    ScanFailed { reason: String },
    /// An advertisement carrying the UART service was seen
    AdvertisementSeen {
        address: DeviceAddress,
        service_data: Option<Vec<u8>>,
    },
    /// Connection state of a remote device changed
    ConnectionStateChanged {
        address: DeviceAddress,
        status: LinkStatus,
    },
    /// MTU exchange finished; `mtu` is `None` when the exchange failed
    MtuChanged {
        address: DeviceAddress,
        mtu: Option<u16>,
    },
    /// Service discovery finished
    ServicesDiscovered {
        address: DeviceAddress,
        result: Result<GattProfile, String>,
    },
    /// CCCD write on the RX characteristic was confirmed or rejected
    DescriptorWritten { address: DeviceAddress, success: bool },
    /// RX characteristic notified a value
    CharacteristicChanged { address: DeviceAddress, value: Vec<u8> },
    /// A characteristic read finished; `value` is `None` on failure
    CharacteristicRead {
        address: DeviceAddress,
        characteristic: Uuid,
        value: Option<Vec<u8>>,
    },
    /// The in-flight TX write finished
    CharacteristicWritten { address: DeviceAddress, success: bool },
}

/// Operations the client role asks the transport to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    StartScan { service: Uuid, mode: ScanMode },
    StopScan,
    Connect { address: DeviceAddress },
    Disconnect { address: DeviceAddress },
    RequestMtu { address: DeviceAddress, mtu: u16 },
    RequestConnectionPriority {
        address: DeviceAddress,
        priority: ConnectionPriority,
    },
    DiscoverServices { address: DeviceAddress },
    EnableNotifications { address: DeviceAddress },
    ReadCharacteristic {
        address: DeviceAddress,
        characteristic: Uuid,
    },
    WriteCharacteristic {
        address: DeviceAddress,
        data: Vec<u8>,
        mode: WriteMode,
    },
}

// ----------------------------------------------------------------------------
// Server (Peripheral) Channel
// ----------------------------------------------------------------------------

/// Advertising inputs taken verbatim from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParameters {
    pub interval: Duration,
    pub tx_power_dbm: i16,
    pub connectable: bool,
    pub local_name: String,
}

/// Transport callbacks delivered to the server role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    AdvertisingStarted,
    AdvertisingFailed { reason: String },
    /// Raw transport connection state; informational only
    ConnectionStateChanged { address: DeviceAddress, connected: bool },
    /// A central wrote the RX characteristic CCCD
    NotificationsChanged { address: DeviceAddress, enabled: bool },
    /// A central wrote the TX characteristic
    CharacteristicWriteRequest { address: DeviceAddress, value: Vec<u8> },
    /// The in-flight notification finished
    NotificationSent { address: DeviceAddress, success: bool },
    MtuChanged { address: DeviceAddress, mtu: u16 },
}

/// Operations the server role asks the transport to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    /// Serve the UART service and advertise it with `service_data`
    StartAdvertising {
        service: Uuid,
        service_data: Vec<u8>,
        parameters: AdvertisingParameters,
    },
    StopAdvertising,
    Notify { address: DeviceAddress, data: Vec<u8> },
    CancelConnection { address: DeviceAddress },
}

// ----------------------------------------------------------------------------
// Observer Notifications
// ----------------------------------------------------------------------------

/// Notifications raised to registered observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UartEvent {
    Connected { address: DeviceAddress, role: LinkRole },
    ConnectFailed { error: UartError },
    Disconnected { address: DeviceAddress, role: LinkRole },
    Received { address: DeviceAddress, data: Vec<u8> },
    DeviceFound { address: DeviceAddress },
    DeviceInfoAvailable { address: DeviceAddress },
    Error { error: UartError },
}

// ----------------------------------------------------------------------------
// State Transition Results
// ----------------------------------------------------------------------------

/// Result of feeding one event or call into a role state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<C> {
    /// Commands for the transport, in issue order
    pub effects: Vec<C>,
    /// Notifications for observers, in raise order
    pub events: Vec<UartEvent>,
}

impl<C> Default for Transition<C> {
    fn default() -> Self {
        Self {
            effects: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl<C> Transition<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effect(&mut self, command: C) {
        self.effects.push(command);
    }

    pub fn event(&mut self, event: UartEvent) {
        self.events.push(event);
    }

    pub fn merge(&mut self, other: Transition<C>) {
        self.effects.extend(other.effects);
        self.events.extend(other.events);
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty() && self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_missing_elements() {
        assert_eq!(GattProfile::uart().missing_uart_element(), None);
        assert_eq!(
            GattProfile::default().missing_uart_element(),
            Some("UART service")
        );
        let profile = GattProfile {
            rx_characteristic: false,
            ..GattProfile::uart()
        };
        assert_eq!(profile.missing_uart_element(), Some("RX characteristic"));
    }

    #[test]
    fn test_transition_merge_keeps_order() {
        let mut first: Transition<u8> = Transition::new();
        first.effect(1);
        let mut second = Transition::new();
        second.effect(2);
        second.event(UartEvent::DeviceFound {
            address: DeviceAddress::new([0; 6]),
        });

        first.merge(second);
        assert_eq!(first.effects, vec![1, 2]);
        assert_eq!(first.events.len(), 1);
        assert!(!first.is_empty());
    }
}
