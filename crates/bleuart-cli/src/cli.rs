//! Command-line interface definitions and parsing

use bleuart_core::{GapRole, WriteMode};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Sub-roles to run: central, peripheral or bridge
    #[arg(short, long)]
    pub role: Option<GapRole>,

    /// MTU requested on outbound links
    #[arg(long)]
    pub mtu: Option<u16>,

    /// Client write variant: request or command
    #[arg(long)]
    pub write_mode: Option<WriteMode>,

    /// Fixed peer identity as 8 hex characters (random when omitted)
    #[arg(long)]
    pub identity: Option<String>,

    /// Read Device Information after each outbound link comes up
    #[arg(long)]
    pub device_info: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive session; stdin lines are sent to every peer
    Chat,
    /// Send a single message once a peer is connected, then exit
    Send {
        /// Message content
        message: String,
        /// Seconds to wait for a peer before giving up
        #[arg(short, long, default_value_t = 30)]
        wait: u64,
    },
    /// List UART peers this side would connect to
    ///
    /// A peer is listed only when the local identity is larger than the one it
    /// advertises; the remaining peers are expected to connect to this side.
    Scan {
        /// Seconds to scan for
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
    },
    /// Print an example configuration file
    Config,
}
