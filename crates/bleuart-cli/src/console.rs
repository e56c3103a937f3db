//! Console output for engine events

use std::sync::{Arc, Weak};

use bleuart_core::{DeviceAddress, DualRoleUart, LinkRole, UartError, UartObserver};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Render a received payload for the terminal
pub fn format_payload(data: &[u8], show_hex: bool) -> String {
    if show_hex {
        return hex::encode(data);
    }
    match std::str::from_utf8(data) {
        Ok(text) => text.trim_end_matches(['\r', '\n']).to_string(),
        Err(_) => format!("<{} bytes> {}", data.len(), hex::encode(data)),
    }
}

/// Observer printing engine events to stdout
///
/// With `connect_on_found` set it also connects to every peer the engine
/// reports as found, calling back into the engine from the callback.
pub struct ConsoleObserver {
    engine: Weak<DualRoleUart>,
    connect_on_found: bool,
    show_hex: bool,
    found: Mutex<Vec<DeviceAddress>>,
}

impl ConsoleObserver {
    pub fn new(engine: &Arc<DualRoleUart>, connect_on_found: bool, show_hex: bool) -> Self {
        Self {
            engine: Arc::downgrade(engine),
            connect_on_found,
            show_hex,
            found: Mutex::new(Vec::new()),
        }
    }

    /// Peers reported as found so far, in discovery order
    pub fn found(&self) -> Vec<DeviceAddress> {
        self.found.lock().clone()
    }

    fn remember(&self, address: DeviceAddress) -> bool {
        let mut found = self.found.lock();
        if found.contains(&address) {
            return false;
        }
        found.push(address);
        true
    }
}

impl UartObserver for ConsoleObserver {
    fn on_connected(&self, address: DeviceAddress, role: LinkRole) {
        println!("* connected to {} ({})", address, role);
    }

    fn on_connect_failed(&self, error: &UartError) {
        println!("* connect failed: {}", error);
    }

    fn on_disconnected(&self, address: DeviceAddress, role: LinkRole) {
        println!("* disconnected from {} ({})", address, role);
    }

    fn on_receive(&self, address: DeviceAddress, data: &[u8]) {
        println!("[{}] {}", address, format_payload(data, self.show_hex));
    }

    fn on_device_found(&self, address: DeviceAddress) {
        if !self.remember(address) {
            return;
        }
        println!("* found {}", address);

        if !self.connect_on_found {
            return;
        }
        match self.engine.upgrade() {
            Some(engine) => {
                info!("Connecting to {}", address);
                engine.connect(address);
            }
            None => warn!("Engine gone, not connecting to {}", address),
        }
    }

    fn on_device_info_available(&self, address: DeviceAddress) {
        let Some(engine) = self.engine.upgrade() else {
            return;
        };
        println!("* device info for {}:\n{}", address, engine.device_info());
    }

    fn on_error(&self, error: &UartError) {
        println!("* error: {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bleuart_core::{ClientCommand, EngineConfig, GapRole, PeerIdentity, ServerCommand};

    #[test]
    fn test_format_payload() {
        assert_eq!(format_payload(b"hello\r\n", false), "hello");
        assert_eq!(format_payload(&[0xff, 0x00], false), "<2 bytes> ff00");
        assert_eq!(format_payload(b"hi", true), "6869");
    }

    #[test]
    fn test_found_peer_is_connected_once() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let log = commands.clone();
        let engine = Arc::new(
            DualRoleUart::new(
                EngineConfig::new().with_gap_role(GapRole::Central),
                PeerIdentity::new(7),
                Arc::new(move |command: ClientCommand| log.lock().push(command)),
                Arc::new(|_: ServerCommand| {}),
            )
            .unwrap(),
        );
        let observer = ConsoleObserver::new(&engine, true, false);
        let address = DeviceAddress::new([0, 0, 0, 0, 0, 1]);

        observer.on_device_found(address);
        observer.on_device_found(address);

        assert_eq!(observer.found(), vec![address]);
        let connects = commands
            .lock()
            .iter()
            .filter(|c| matches!(c, ClientCommand::Connect { .. }))
            .count();
        assert_eq!(connects, 1);
    }
}
