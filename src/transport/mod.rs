//! Transport layer: one bidirectional message channel per peer
//!
//! A [`Connection`] wraps a WebSocket and exposes a non-blocking send handle,
//! an inbound event stream, and a lifecycle-state signal. Transport failures
//! are reported as events and state transitions, never thrown across the
//! event boundary; callers observe state, they do not catch mid-stream.

use thiserror::Error;

pub mod websocket;

pub use websocket::{Connection, ConnectionEvent, ConnectionHandle};

/// WebSocket endpoint path every peer connects to.
pub const WS_PATH: &str = "/ws";

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// WebSocket protocol or IO failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Connection attempt exceeded its timeout
    #[error("connection attempt timed out")]
    Timeout,

    /// The channel is closed; no further sends are possible
    #[error("connection closed")]
    Closed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Lifecycle of one connection; terminal at `Closed`. A new physical
/// connection is a new [`Connection`], there is no reopening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress
    Connecting,
    /// Channel is open and ready
    Open,
    /// Channel is closed, possibly with an error detail
    Closed,
}
