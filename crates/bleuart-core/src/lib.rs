//! Dual-role BLE UART link engine
//!
//! This crate implements the connection and transfer logic of a Bluetooth Low
//! Energy "UART" link in which every device is a central and a peripheral at
//! the same time. It contains no Bluetooth code: host bindings feed transport
//! callbacks in as events and execute the commands handed back.
//!
//! ## Architecture
//!
//! - [`queue`] - Single-flight FIFO per connection
//! - [`discovery`] - Sighting deduplication and the identity tie-break
//! - [`client`] - Central role: scanning, link setup, TX writes
//! - [`server`] - Peripheral role: advertising, subscribers, RX notifications
//! - [`dual_role`] - Coordinator composing both roles behind one UART
//! - [`observer`] - Weakly held observer set shared by both roles
//! - [`channel`] - Events in, commands and observer notifications out
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use bleuart_core::{
//!     ClientCommand, DualRoleUart, EngineConfig, GapRole, PeerIdentity, ServerCommand,
//! };
//!
//! # fn example() -> bleuart_core::Result<()> {
//! let config = EngineConfig::new()
//!     .with_gap_role(GapRole::Bridge)
//!     .with_requested_mtu(185);
//!
//! let engine = DualRoleUart::new(
//!     config,
//!     PeerIdentity::random(),
//!     Arc::new(|command: ClientCommand| println!("client: {:?}", command)),
//!     Arc::new(|command: ServerCommand| println!("server: {:?}", command)),
//! )?;
//!
//! engine.start();
//! engine.send_text("hello");
//! # Ok(())
//! # }
//! ```

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod client;
pub mod config;
pub mod device_info;
pub mod discovery;
pub mod dual_role;
pub mod errors;
pub mod observer;
pub mod peer;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{
    AdvertisingParameters, ClientCommand, ClientEvent, GattProfile, LinkStatus, ServerCommand,
    ServerEvent, Transition, UartEvent,
};
pub use client::LinkClient;
pub use config::{
    AdvertiseMode, AdvertiseTxPower, ConnectionPriority, EngineConfig, GapRole, ScanMode,
    WriteMode,
};
pub use device_info::DeviceInfoRecord;
pub use discovery::{DiscoveredPeer, DiscoveryArbiter, Verdict};
pub use dual_role::{ClientDriver, DualRoleUart, ServerDriver};
pub use errors::{Result, UartError};
pub use observer::{ObserverHandle, ObserverRegistry, UartObserver};
pub use peer::{Connection, ConnectionState};
pub use queue::{PendingTransfer, TransferQueue};
pub use server::{AdvertisingState, LinkServer};
pub use types::{DeviceAddress, LinkRole, PeerIdentity};
