//! Connection records and client link lifecycle

use core::fmt;

use crate::config::ConnectionPriority;
use crate::protocol::DEFAULT_ATT_MTU;
use crate::types::{DeviceAddress, LinkRole};

// ----------------------------------------------------------------------------
// Connection State
// ----------------------------------------------------------------------------

/// Setup progress of a client-initiated link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    NegotiatingMtu,
    DiscoveringServices,
    SubscribingNotifications,
    ReadingDeviceInfo,
    Ready,
}

impl ConnectionState {
    /// RX notifications are enabled in this state
    pub fn is_subscribed(&self) -> bool {
        matches!(self, ConnectionState::ReadingDeviceInfo | ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::NegotiatingMtu => "negotiating MTU",
            ConnectionState::DiscoveringServices => "discovering services",
            ConnectionState::SubscribingNotifications => "subscribing",
            ConnectionState::ReadingDeviceInfo => "reading device info",
            ConnectionState::Ready => "ready",
        };
        f.write_str(text)
    }
}

// ----------------------------------------------------------------------------
// Connection
// ----------------------------------------------------------------------------

/// One link owned by either role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub address: DeviceAddress,
    pub role: LinkRole,
    /// Negotiated ATT MTU, `DEFAULT_ATT_MTU` until an exchange completes
    pub mtu: u16,
    /// Connection-interval class requested on this link, client only
    pub priority: Option<ConnectionPriority>,
    pub state: ConnectionState,
}

impl Connection {
    /// Link the local central is setting up
    pub fn outbound(address: DeviceAddress) -> Self {
        Self {
            address,
            role: LinkRole::Client,
            mtu: DEFAULT_ATT_MTU,
            priority: None,
            state: ConnectionState::Connecting,
        }
    }

    /// Central that subscribed to the local RX characteristic
    pub fn subscriber(address: DeviceAddress, mtu: u16) -> Self {
        Self {
            address,
            role: LinkRole::Server,
            mtu,
            priority: None,
            state: ConnectionState::Ready,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Move to `next`, returning the previous state
    pub fn advance(&mut self, next: ConnectionState) -> ConnectionState {
        core::mem::replace(&mut self.state, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_starts_connecting() {
        let mut connection = Connection::outbound(DeviceAddress::new([1; 6]));
        assert_eq!(connection.mtu, DEFAULT_ATT_MTU);
        assert!(!connection.is_ready());
        assert!(!connection.state.is_subscribed());

        let previous = connection.advance(ConnectionState::ReadingDeviceInfo);
        assert_eq!(previous, ConnectionState::Connecting);
        assert!(connection.state.is_subscribed());
    }

    #[test]
    fn test_subscriber_is_ready() {
        let connection = Connection::subscriber(DeviceAddress::new([2; 6]), 64);
        assert_eq!(connection.role, LinkRole::Server);
        assert!(connection.is_ready());
    }
}
