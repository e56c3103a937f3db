//! Command handlers for the BLE UART CLI

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use bleuart_ble::BleHost;
use bleuart_core::{DeviceAddress, DualRoleUart, GapRole};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::console::ConsoleObserver;
use crate::error::{CliError, Result};

const CONNECTION_POLL: Duration = Duration::from_millis(100);
const SEND_DRAIN: Duration = Duration::from_secs(1);

// ----------------------------------------------------------------------------
// Chat Input
// ----------------------------------------------------------------------------

/// One line typed in chat mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatInput {
    Send(String),
    Connect(DeviceAddress),
    ConnectFirst,
    Disconnect,
    Status,
    Info,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl ChatInput {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ChatInput::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return ChatInput::Send(line.trim_end_matches(['\r', '\n']).to_string());
        };

        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("connect"), Some(address)) => match address.parse() {
                Ok(address) => ChatInput::Connect(address),
                Err(e) => ChatInput::Invalid(e.to_string()),
            },
            (Some("connect"), None) => ChatInput::Invalid("usage: /connect AA:BB:CC:DD:EE:FF".into()),
            (Some("first"), _) => ChatInput::ConnectFirst,
            (Some("disconnect"), _) => ChatInput::Disconnect,
            (Some("status"), _) => ChatInput::Status,
            (Some("info"), _) => ChatInput::Info,
            (Some("help"), _) => ChatInput::Help,
            (Some("quit" | "exit"), _) => ChatInput::Quit,
            (Some(other), _) => ChatInput::Invalid(format!("unknown command /{}", other)),
            (None, _) => ChatInput::Empty,
        }
    }
}

const HELP: &str = "\
/connect ADDR  connect to a peer
/first         reconnect to the first UART device seen
/disconnect    drop every outbound link
/status        show role, MTU and connection count
/info          show device information of the first outbound link
/quit          exit
anything else is sent to every connected peer";

// ----------------------------------------------------------------------------
// Command Dispatcher
// ----------------------------------------------------------------------------

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Chat => Self::handle_chat_command(config).await,
            Commands::Send { message, wait } => {
                Self::handle_send_command(config, message, Duration::from_secs(wait)).await
            }
            Commands::Scan { duration } => {
                Self::handle_scan_command(config, Duration::from_secs(duration)).await
            }
            Commands::Config => {
                println!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    async fn start_host(config: &AppConfig) -> Result<(BleHost, Arc<ConsoleObserver>)> {
        let identity = config.peer_identity()?;
        let host = BleHost::start(config.engine.clone(), identity).await?;

        let observer = Arc::new(ConsoleObserver::new(
            host.engine(),
            config.console.connect_on_found,
            config.console.show_hex,
        ));
        host.engine().register_observer(&observer);
        host.engine().start();

        info!("Local identity {}", identity);
        Ok((host, observer))
    }

    /// Handle the interactive chat command
    async fn handle_chat_command(config: AppConfig) -> Result<()> {
        let (host, _observer) = Self::start_host(&config).await?;
        let engine = host.engine().clone();
        println!("Type /help for commands");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            write_prompt(&mut std::io::stdout(), &config.console.prompt)?;
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else {
                break;
            };

            match ChatInput::parse(&line) {
                ChatInput::Send(text) => {
                    let chunks = engine.send_text(&text);
                    if chunks > 0 && engine.num_connections() == 0 {
                        println!("* no peers connected");
                    }
                }
                ChatInput::Connect(address) => engine.connect(address),
                ChatInput::ConnectFirst => engine.connect_first_available(),
                ChatInput::Disconnect => engine.disconnect(),
                ChatInput::Status => print_status(&engine),
                ChatInput::Info => {
                    let info = engine.device_info();
                    if info.is_empty() {
                        println!("* no device information available");
                    } else {
                        print!("{}", info);
                    }
                }
                ChatInput::Help => println!("{}", HELP),
                ChatInput::Quit => break,
                ChatInput::Empty => {}
                ChatInput::Invalid(reason) => println!("* {}", reason),
            }
        }

        host.shutdown().await;
        Ok(())
    }

    /// Handle the send command
    async fn handle_send_command(config: AppConfig, message: String, wait: Duration) -> Result<()> {
        let (host, _observer) = Self::start_host(&config).await?;
        let engine = host.engine().clone();

        let connected = tokio::time::timeout(wait, async {
            while engine.num_connections() == 0 {
                tokio::time::sleep(CONNECTION_POLL).await;
            }
        })
        .await;

        if connected.is_err() {
            host.shutdown().await;
            return Err(CliError::Timeout("a peer to connect".to_string()));
        }

        let chunks = engine.send_text(&message);
        println!(
            "Message sent to {} peer(s) in {} chunk(s)",
            engine.num_connections(),
            chunks
        );

        // Leave time for the queued chunks to drain
        tokio::time::sleep(SEND_DRAIN).await;
        host.shutdown().await;
        Ok(())
    }

    /// Handle the scan command
    ///
    /// Lists the peers the engine reports as found, which excludes peers with a
    /// larger identity since those initiate the connection themselves.
    async fn handle_scan_command(mut config: AppConfig, duration: Duration) -> Result<()> {
        config.engine.gap_role = GapRole::Central;
        config.engine.auto_connect = false;
        config.console.connect_on_found = false;

        let (host, observer) = Self::start_host(&config).await?;
        info!("Scanning for {:?}... Press Ctrl+C to stop", duration);

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = tokio::signal::ctrl_c() => {}
        }

        let found = observer.found();
        println!("Found {} peer(s) to connect to", found.len());
        for address in found {
            println!("  {}", address);
        }

        host.shutdown().await;
        Ok(())
    }
}

fn write_prompt<W: Write>(out: &mut W, prompt: &str) -> std::io::Result<()> {
    out.write_all(prompt.as_bytes())?;
    out.flush()
}

fn print_status(engine: &DualRoleUart) {
    println!("Role         : {}", engine.gap_role());
    println!("Identity     : {}", engine.local_identity());
    println!("MTU          : {}", engine.mtu());
    println!("Connections  : {}", engine.num_connections());
    println!("Scanning     : {}", engine.is_scanning());
    println!("Advertising  : {:?}", engine.advertising_state());
}
