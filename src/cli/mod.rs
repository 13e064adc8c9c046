//! Command-line interface

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::clipboard::{self, SystemClipboard};
use crate::config::{self, SyncConfig, DEFAULT_PORT};
use crate::relay::Relay;
use crate::sync::{ReconnectPolicy, SyncEngine, SyncEvent};

/// Clipboard synchronization relay and client
#[derive(Debug, Parser)]
#[command(name = "tailsync", version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the broadcast relay
    Relay {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,

        /// Port to listen on
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// Run the sync client against the system clipboard
    Client {
        /// Relay host name or IP (overrides the config file)
        #[arg(long)]
        address: Option<String>,

        /// Relay port
        #[arg(long)]
        port: Option<u16>,

        /// Connect with wss instead of ws
        #[arg(long)]
        secure: bool,

        /// Shared encryption password
        #[arg(long)]
        password: Option<String>,

        /// Origin tag attached to outbound updates (defaults to hostname)
        #[arg(long)]
        source: Option<String>,
    },
}

/// Dispatch a parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Relay { bind, port } => run_relay(&bind, port).await,
        Command::Client {
            address,
            port,
            secure,
            password,
            source,
        } => {
            let config = resolve_config(cli.config, address, port, secure, password)?;
            run_client(config, source).await
        }
    }
}

async fn run_relay(bind: &str, port: u16) -> Result<()> {
    let relay = Relay::bind((bind, port))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    relay.run().await?;
    Ok(())
}

/// CLI flags win over the config file; the file fills in what flags omit.
fn resolve_config(
    config_path: Option<PathBuf>,
    address: Option<String>,
    port: Option<u16>,
    secure: bool,
    password: Option<String>,
) -> Result<SyncConfig> {
    let path = config_path.or_else(config::default_path);
    let file_config = match &path {
        Some(path) if path.exists() => Some(config::load(path)?),
        _ => None,
    };

    let mut config = match (address, file_config) {
        (Some(address), Some(file)) => {
            let mut merged = file;
            merged.address = address;
            merged
        }
        (Some(address), None) => {
            SyncConfig::new(address, port.unwrap_or(DEFAULT_PORT), secure, None)
        }
        (None, Some(file)) => file,
        (None, None) => match path {
            Some(path) => bail!(config::ConfigError::Missing(path)),
            None => bail!("no server address configured; pass --address"),
        },
    };
    if let Some(port) = port {
        config.port = port;
    }
    if secure {
        config.secure = true;
    }
    if password.is_some() {
        config.password = password;
    }
    config.validate()?;
    Ok(config)
}

async fn run_client(config: SyncConfig, source: Option<String>) -> Result<()> {
    let clipboard = Arc::new(SystemClipboard::new());
    let changes = clipboard::watch_clipboard(clipboard.clone(), clipboard::POLL_INTERVAL);
    let (mut engine, handle) = SyncEngine::new(clipboard, changes, ReconnectPolicy::default());
    if let Some(source) = source {
        engine = engine.with_source(source);
    }

    let mut events = handle.subscribe();
    tokio::spawn(engine.run());

    let auto_connect = config.auto_connect;
    handle.configure(config)?;
    if auto_connect {
        handle.connect()?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SyncEvent::State(state)) => info!(?state, "sync state"),
                Ok(SyncEvent::Applied { update }) => {
                    info!(source = %update.source, chars = update.plain_text.chars().count(), "applied remote clipboard");
                }
                Ok(SyncEvent::Sent { plain_text }) => {
                    info!(chars = plain_text.chars().count(), "sent local clipboard");
                }
                Ok(SyncEvent::Error { title, detail }) => error!(%title, %detail, "sync error"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                let _ = handle.disconnect();
                break;
            }
        }
    }
    Ok(())
}
