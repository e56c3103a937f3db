//! BLE UART CLI configuration
//!
//! Configuration is read from a TOML file with an `[engine]` table holding the
//! engine options and a `[console]` table for terminal behaviour. Command-line
//! flags override the file.

use std::path::Path;

use bleuart_core::{EngineConfig, PeerIdentity};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{CliError, Result};

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fixed peer identity as 8 hex characters; random when unset
    pub identity: Option<String>,

    /// Engine options
    pub engine: EngineConfig,

    /// Terminal options
    pub console: ConsoleConfig,
}

/// Terminal behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prompt shown in chat mode
    pub prompt: String,

    /// Connect to every peer reported as found
    pub connect_on_found: bool,

    /// Print received payloads as hex instead of text
    pub show_hex: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: "uart> ".to_string(),
            connect_on_found: true,
            show_hex: false,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply command-line overrides on top of the loaded file
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(role) = cli.role {
            self.engine.gap_role = role;
        }
        if let Some(mtu) = cli.mtu {
            self.engine.requested_mtu = mtu;
        }
        if let Some(mode) = cli.write_mode {
            self.engine.write_mode = mode;
        }
        if let Some(identity) = &cli.identity {
            self.identity = Some(identity.clone());
        }
        if cli.device_info {
            self.engine.read_device_info = true;
        }
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.peer_identity()?;
        Ok(())
    }

    /// Get the effective peer identity, generating one if necessary
    pub fn peer_identity(&self) -> Result<PeerIdentity> {
        let Some(text) = &self.identity else {
            return Ok(PeerIdentity::random());
        };

        let bytes = hex::decode(text)?;
        if bytes.len() != PeerIdentity::WIRE_LEN {
            return Err(CliError::Config(format!(
                "Identity must be exactly {} bytes ({} hex chars), got {} bytes",
                PeerIdentity::WIRE_LEN,
                PeerIdentity::WIRE_LEN * 2,
                bytes.len()
            )));
        }
        PeerIdentity::from_bytes(&bytes)
            .ok_or_else(|| CliError::Config(format!("Invalid identity {}", text)))
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig {
            identity: Some("0000002a".to_string()),
            ..Default::default()
        };

        toml::to_string_pretty(&example)
            .unwrap_or_else(|_| "# Failed to generate example config".to_string())
    }
}
