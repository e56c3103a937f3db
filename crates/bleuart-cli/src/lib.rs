//! BLE UART CLI library
//!
//! Components of the `bleuart` terminal host: argument parsing, configuration,
//! console output for engine events and the command handlers.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;

pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
