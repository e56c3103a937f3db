//! Error handling for the BLE UART CLI

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Engine error: {0}")]
    Engine(#[from] bleuart_core::UartError),

    #[error("Bluetooth host error: {0}")]
    Host(#[from] bleuart_ble::BleHostError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("Hex decoding error: {0}")]
    HexDecoding(#[from] hex::FromHexError),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
