//! Wiring between the engine and the Bluetooth stack

use std::sync::Arc;
use std::time::Duration;

use bleuart_core::{
    ClientCommand, ClientDriver, DualRoleUart, EngineConfig, PeerIdentity, ServerCommand,
    ServerDriver,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::advertising::{PeripheralHost, PlatformPeripheral};
use crate::central::CentralHost;
use crate::error::Result;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

// ----------------------------------------------------------------------------
// Command Channels
// ----------------------------------------------------------------------------

/// Driver that forwards engine commands to a host task
pub struct CommandSender<C> {
    tx: mpsc::UnboundedSender<C>,
}

impl<C> CommandSender<C> {
    pub fn new(tx: mpsc::UnboundedSender<C>) -> Self {
        Self { tx }
    }
}

impl ClientDriver for CommandSender<ClientCommand> {
    fn submit(&self, command: ClientCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!("Central host gone, dropping {:?}", e.0);
        }
    }
}

impl ServerDriver for CommandSender<ServerCommand> {
    fn submit(&self, command: ServerCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!("Peripheral host gone, dropping {:?}", e.0);
        }
    }
}

// ----------------------------------------------------------------------------
// BLE Host
// ----------------------------------------------------------------------------

/// Running engine bound to the local Bluetooth adapter
pub struct BleHost {
    engine: Arc<DualRoleUart>,
    tasks: Vec<JoinHandle<()>>,
}

impl BleHost {
    /// Build the engine and spawn a host task for each role it runs
    ///
    /// The engine is returned idle; call [`DualRoleUart::start`] once observers
    /// are registered.
    pub async fn start(config: EngineConfig, identity: PeerIdentity) -> Result<Self> {
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let gap_role = config.gap_role;

        let engine = Arc::new(DualRoleUart::new(
            config,
            identity,
            Arc::new(CommandSender::new(client_tx)),
            Arc::new(CommandSender::new(server_tx)),
        )?);

        let mut tasks = Vec::new();

        if gap_role.runs_client() {
            let central = CentralHost::new(engine.clone()).await?;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = central.run(client_rx).await {
                    error!("Central host failed: {}", e);
                }
            }));
        }

        if gap_role.runs_server() {
            let backend = PlatformPeripheral::new(engine.clone());
            let peripheral = PeripheralHost::new(backend, engine.clone());
            tasks.push(tokio::spawn(peripheral.run(server_rx)));
        }

        info!("BLE host running as {}", gap_role);
        Ok(Self { engine, tasks })
    }

    pub fn engine(&self) -> &Arc<DualRoleUart> {
        &self.engine
    }

    /// Stop both roles, drop every link and end the host tasks
    pub async fn shutdown(self) {
        self.engine.stop();
        self.engine.disconnect();

        // Let the hosts drain the stop commands before tearing them down
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        for task in self.tasks {
            task.abort();
        }
        info!("BLE host shut down");
    }
}
