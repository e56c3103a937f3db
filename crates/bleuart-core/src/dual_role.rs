//! Dual-role coordinator
//!
//! [`DualRoleUart`] composes one [`LinkClient`] and one [`LinkServer`] behind a
//! single UART facade. Host bindings feed transport callbacks in through
//! [`DualRoleUart::handle_client_event`] / [`DualRoleUart::handle_server_event`]
//! and receive commands through the [`ClientDriver`] / [`ServerDriver`] they
//! supplied at construction.
//!
//! Each role sits behind its own lock. Commands are submitted and observers are
//! called only after that lock is released, so an observer may call straight
//! back into the coordinator.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::channel::{ClientCommand, ClientEvent, ServerCommand, ServerEvent, Transition};
use crate::client::LinkClient;
use crate::config::{EngineConfig, GapRole};
use crate::errors::Result;
use crate::observer::{ObserverHandle, ObserverRegistry, UartObserver};
use crate::protocol::chunk_payload;
use crate::server::{AdvertisingState, LinkServer};
use crate::types::{DeviceAddress, PeerIdentity};

// ----------------------------------------------------------------------------
// Host Drivers
// ----------------------------------------------------------------------------

/// Executes client commands against a Bluetooth stack
pub trait ClientDriver: Send + Sync {
    fn submit(&self, command: ClientCommand);
}

/// Executes server commands against a Bluetooth stack
pub trait ServerDriver: Send + Sync {
    fn submit(&self, command: ServerCommand);
}

impl<F> ClientDriver for F
where
    F: Fn(ClientCommand) + Send + Sync,
{
    fn submit(&self, command: ClientCommand) {
        self(command)
    }
}

impl<F> ServerDriver for F
where
    F: Fn(ServerCommand) + Send + Sync,
{
    fn submit(&self, command: ServerCommand) {
        self(command)
    }
}

// ----------------------------------------------------------------------------
// Coordinator
// ----------------------------------------------------------------------------

/// Client and server roles behind one UART
pub struct DualRoleUart {
    config: EngineConfig,
    identity: PeerIdentity,
    client: Mutex<LinkClient>,
    server: Mutex<LinkServer>,
    client_driver: Arc<dyn ClientDriver>,
    server_driver: Arc<dyn ServerDriver>,
    observers: Arc<ObserverRegistry>,
}

impl DualRoleUart {
    /// Build an engine; fails when `config` is out of range
    pub fn new(
        config: EngineConfig,
        identity: PeerIdentity,
        client_driver: Arc<dyn ClientDriver>,
        server_driver: Arc<dyn ServerDriver>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Creating {} engine with identity {} (MTU {})",
            config.gap_role, identity, config.requested_mtu
        );

        Ok(Self {
            client: Mutex::new(LinkClient::new(config.clone(), identity)),
            server: Mutex::new(LinkServer::new(config.clone(), identity)),
            config,
            identity,
            client_driver,
            server_driver,
            observers: Arc::new(ObserverRegistry::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gap_role(&self) -> GapRole {
        self.config.gap_role
    }

    pub fn local_identity(&self) -> PeerIdentity {
        self.identity
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Register with both roles at once; the engine holds only a weak reference
    pub fn register_observer<O: UartObserver + 'static>(&self, observer: &Arc<O>) -> ObserverHandle {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.observers.unregister(handle)
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Start scanning, advertising, or both according to the gap role
    pub fn start(&self) {
        info!("Starting {} engine", self.config.gap_role);
        if self.config.gap_role.runs_server() {
            let transition = self.server.lock().start();
            self.apply_server(transition);
        }
        if self.config.gap_role.runs_client() {
            let transition = self.client.lock().start_scan();
            self.apply_client(transition);
        }
    }

    /// Stop the sub-roles `start` started; client links stay up
    pub fn stop(&self) {
        info!("Stopping {} engine", self.config.gap_role);
        if self.config.gap_role.runs_client() {
            let transition = self.client.lock().stop_scan();
            self.apply_client(transition);
        }
        if self.config.gap_role.runs_server() {
            let transition = self.server.lock().stop();
            self.apply_server(transition);
        }
    }

    pub fn connect(&self, address: DeviceAddress) {
        let transition = self.client.lock().connect(address);
        self.apply_client(transition);
    }

    pub fn connect_first_available(&self) {
        let transition = self.client.lock().connect_first_available();
        self.apply_client(transition);
    }

    /// Tear down every client link; valid in any gap role
    pub fn disconnect(&self) {
        let transition = self.client.lock().disconnect();
        self.apply_client(transition);
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Send `data` to every connected peer of every active role
    ///
    /// The message is split into chunks that fit the engine MTU; each chunk is
    /// queued once per link. Returns the number of chunks produced.
    pub fn send(&self, data: &[u8]) -> usize {
        let mtu = self.mtu();
        let mut chunks = 0;
        let mut client_transition = Transition::new();
        let mut server_transition = Transition::new();

        {
            let mut client = self.client.lock();
            let mut server = self.server.lock();
            for chunk in chunk_payload(data, mtu) {
                chunks += 1;
                if self.config.gap_role.runs_client() {
                    client_transition.merge(client.send(chunk));
                }
                if self.config.gap_role.runs_server() {
                    server_transition.merge(server.send(chunk));
                }
            }
        }

        debug!("Queued {} bytes as {} chunks at MTU {}", data.len(), chunks, mtu);
        self.apply_client(client_transition);
        self.apply_server(server_transition);
        chunks
    }

    pub fn send_text(&self, text: &str) -> usize {
        self.send(text.as_bytes())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Engine MTU: the lower of both role floors
    pub fn mtu(&self) -> u16 {
        let client = self.client.lock().mtu();
        let server = self.server.lock().mtu();
        client.min(server)
    }

    pub fn num_connections(&self) -> usize {
        self.client.lock().num_connections() + self.server.lock().num_connections()
    }

    pub fn device_info(&self) -> String {
        self.client.lock().device_info()
    }

    pub fn is_scanning(&self) -> bool {
        self.client.lock().is_scanning()
    }

    pub fn advertising_state(&self) -> AdvertisingState {
        self.server.lock().state()
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    pub fn handle_client_event(&self, event: ClientEvent) {
        self.handle_client_event_at(event, Instant::now());
    }

    /// Feed a client callback observed at `now`
    pub fn handle_client_event_at(&self, event: ClientEvent, now: Instant) {
        let transition = self.client.lock().handle_event(event, now);
        self.apply_client(transition);
    }

    pub fn handle_server_event(&self, event: ServerEvent) {
        let transition = self.server.lock().handle_event(event);
        self.apply_server(transition);
    }

    fn apply_client(&self, transition: Transition<ClientCommand>) {
        for command in transition.effects {
            self.client_driver.submit(command);
        }
        self.observers.dispatch_all(&transition.events);
    }

    fn apply_server(&self, transition: Transition<ServerCommand>) {
        for command in transition.effects {
            self.server_driver.submit(command);
        }
        self.observers.dispatch_all(&transition.events);
    }
}

impl core::fmt::Debug for DualRoleUart {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DualRoleUart")
            .field("gap_role", &self.config.gap_role)
            .field("identity", &self.identity)
            .field("observers", &self.observers.len())
            .finish()
    }
}
