//! # TailSync
//!
//! Clipboard synchronization over a central WebSocket relay.
//!
//! A relay rebroadcasts every clipboard update it receives to all other
//! connected clients; each client pushes local clipboard changes and applies
//! remote ones, with echo suppression so updates never loop. Payloads can be
//! end-to-end encrypted with a shared-password-derived key.

pub mod cli;
pub mod clipboard;
pub mod config;
pub mod crypto;
pub mod history;
pub mod protocol;
pub mod relay;
pub mod sync;
pub mod transport;

pub use config::SyncConfig;

/// Result type alias for TailSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for TailSync operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Cipher error
    #[error("Cipher error: {0}")]
    Cipher(#[from] crypto::CipherError),

    /// Wire codec error
    #[error("Codec error: {0}")]
    Codec(#[from] protocol::CodecError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
