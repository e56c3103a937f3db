//! Bluetooth host bindings for the BLE UART engine
//!
//! This crate drives a [`bleuart_core::DualRoleUart`] with the local Bluetooth
//! adapter: engine commands are executed against the stack and stack callbacks
//! are fed back as engine events.
//!
//! ## Architecture
//!
//! - [`central`] - Scanning, connecting and GATT client operations via `btleplug`
//! - [`advertising`] - GATT server and advertising behind a platform backend
//! - [`host`] - Command channels and the task wiring for both roles
//! - [`error`] - Error types specific to the host bindings
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bleuart_ble::BleHost;
//! use bleuart_core::{EngineConfig, GapRole, PeerIdentity};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::new().with_gap_role(GapRole::Bridge);
//! let host = BleHost::start(config, PeerIdentity::random()).await?;
//!
//! host.engine().start();
//! host.engine().send_text("hello");
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: both roles; the peripheral uses `bluer` with BlueZ
//! - **Other platforms**: central role only; advertising reports a start failure

pub mod advertising;
pub mod central;
pub mod error;
pub mod host;

pub use advertising::{PeripheralBackend, PeripheralHost, PlatformPeripheral};
pub use central::CentralHost;
pub use error::{BleHostError, Result};
pub use host::{BleHost, CommandSender};
