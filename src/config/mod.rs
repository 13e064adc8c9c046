//! Configuration for the sync client
//!
//! The core consumes a validated [`SyncConfig`]; reading it from a TOML file
//! or CLI flags happens here, at the edge, never inside the engine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default relay port, matching the reference deployment.
pub const DEFAULT_PORT: u16 = 8000;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading config file
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Validation error
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// No config file and no address given on the command line
    #[error("no server address configured; pass --address or create {0}")]
    Missing(PathBuf),
}

/// Connection target and options for one sync client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Relay host name or IP, scheme-less
    pub address: String,

    /// Relay port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Use `wss` instead of `ws`
    #[serde(default)]
    pub secure: bool,

    /// Shared encryption password; absence disables encryption
    #[serde(default)]
    pub password: Option<String>,

    /// Connect automatically on startup
    #[serde(default = "default_true")]
    pub auto_connect: bool,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

impl SyncConfig {
    pub fn new(address: impl Into<String>, port: u16, secure: bool, password: Option<String>) -> Self {
        Self {
            address: address.into(),
            port,
            secure,
            password,
            auto_connect: true,
        }
    }

    /// Reject configurations that could never connect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sanitized_address().is_empty() {
            return Err(ConfigError::Validation(
                "server address must not be empty".to_owned(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation(
                "port must be between 1 and 65535".to_owned(),
            ));
        }
        if matches!(self.password.as_deref(), Some("")) {
            return Err(ConfigError::Validation(
                "encryption password must not be empty when set".to_owned(),
            ));
        }
        Ok(())
    }

    /// Address with whitespace, control and zero-width characters, any scheme
    /// prefix, and trailing slashes removed.
    ///
    /// Addresses get pasted from browsers and chat apps; stray invisible
    /// characters would otherwise end up in the DNS lookup.
    pub fn sanitized_address(&self) -> String {
        let cleaned: String = self
            .address
            .chars()
            .filter(|c| {
                !c.is_whitespace()
                    && !c.is_control()
                    && !matches!(c, '\u{200B}'..='\u{200D}' | '\u{2060}' | '\u{FEFF}')
            })
            .collect();
        let without_scheme = match cleaned.split_once("://") {
            Some((_, rest)) => rest,
            None => cleaned.as_str(),
        };
        without_scheme.trim_end_matches('/').to_owned()
    }

    /// Full WebSocket endpoint URL.
    pub fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/ws", scheme, self.sanitized_address(), self.port)
    }
}

/// Load a config file, or fall back to defaults requiring CLI overrides.
pub fn load(path: &Path) -> Result<SyncConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let config: SyncConfig = toml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

/// Default config file location (`~/.config/tailsync/config.toml` on Linux).
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tailsync").join("config.toml"))
}
