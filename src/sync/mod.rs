//! Client sync engine
//!
//! The stateful heart of each client: one actor task owns the connection
//! lifecycle, the echo-suppression bookkeeping, and the reconnect schedule.
//! Inbound network messages, local clipboard changes, commands, and the
//! reconnect timer all feed a single `select!` loop, so every state
//! transition happens on one logical sequence and the last-sent/last-received
//! fields can never race.
//!
//! Lifecycle: `Disconnected → Connecting → Connected`, with
//! `Connected → Reconnecting → Connecting → ...` on unexpected loss and any
//! state `→ Disconnected` on explicit disconnect, which is terminal until the
//! next explicit connect.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clipboard::{Clipboard, ClipboardSnapshot};
use crate::config::SyncConfig;
use crate::crypto::Cipher;
use crate::history::{ClipboardHistory, HistoryItem, HistoryOrigin};
use crate::protocol::{self, ClipboardUpdate, CodecError};
use crate::transport::{Connection, ConnectionEvent, ConnectionHandle};
use crate::{Error, Result};

/// Reconnect behavior: capped exponential backoff with a bounded budget
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Backoff cap
    pub max_delay: Duration,
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,
    /// Per-attempt connection timeout
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            max_attempts: 3,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff delay for the given zero-based attempt: `min(base * 2^n, cap)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Engine lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Typed event stream emitted by the engine
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Lifecycle transition
    State(SyncState),
    /// A remote update was written to the local clipboard
    Applied { update: ClipboardUpdate },
    /// A local change was pushed to the relay
    Sent { plain_text: String },
    /// User-facing failure with a diagnostic detail
    Error { title: String, detail: String },
}

enum Command {
    Configure(SyncConfig),
    Connect,
    Disconnect,
}

/// Cloneable control surface for a running engine
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SyncEvent>,
    history: watch::Receiver<Vec<HistoryItem>>,
}

impl SyncHandle {
    /// Store the connection target, deriving the cipher key if a password is
    /// set. Validates synchronously; does not connect.
    pub fn configure(&self, config: SyncConfig) -> Result<()> {
        config.validate()?;
        self.send(Command::Configure(config))
    }

    /// Open (or reopen) the connection to the relay.
    pub fn connect(&self) -> Result<()> {
        self.send(Command::Connect)
    }

    /// Close the connection and suppress all pending and future reconnects.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Observable clipboard history, newest first; the persistence
    /// collaborator subscribes here.
    pub fn history(&self) -> watch::Receiver<Vec<HistoryItem>> {
        self.history.clone()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Other("sync engine is not running".to_owned()))
    }
}

/// One client's synchronization actor
pub struct SyncEngine {
    commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SyncEvent>,
    history_tx: watch::Sender<Vec<HistoryItem>>,
    clipboard: Arc<dyn Clipboard>,
    changes: mpsc::Receiver<ClipboardSnapshot>,
    policy: ReconnectPolicy,
    source: String,

    config: Option<SyncConfig>,
    cipher: Option<Cipher>,
    state: SyncState,
    connection: Option<ConnectionHandle>,
    connection_events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    last_sent: Option<String>,
    last_received: Option<String>,
    attempts: u32,
    manual_disconnect: bool,
    reconnect_at: Option<Instant>,
    failures: Vec<String>,
    history: ClipboardHistory,
}

impl SyncEngine {
    /// Build an engine around a clipboard capability and its change stream.
    pub fn new(
        clipboard: Arc<dyn Clipboard>,
        changes: mpsc::Receiver<ClipboardSnapshot>,
        policy: ReconnectPolicy,
    ) -> (Self, SyncHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(64);
        let (history_tx, history_rx) = watch::channel(Vec::new());

        let hostname = gethostname::gethostname().to_string_lossy().into_owned();
        let source = if hostname.is_empty() {
            "desktop".to_owned()
        } else {
            hostname
        };

        let handle = SyncHandle {
            commands: command_tx,
            events: event_tx.clone(),
            history: history_rx,
        };
        let engine = Self {
            commands: command_rx,
            events: event_tx,
            history_tx,
            clipboard,
            changes,
            policy,
            source,
            config: None,
            cipher: None,
            state: SyncState::Disconnected,
            connection: None,
            connection_events: None,
            last_sent: None,
            last_received: None,
            attempts: 0,
            manual_disconnect: false,
            reconnect_at: None,
            failures: Vec::new(),
            history: ClipboardHistory::new(),
        };
        (engine, handle)
    }

    /// Override the origin tag attached to outbound updates.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Run the actor loop until every [`SyncHandle`] is dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Configure(config)) => self.apply_config(config),
                    Some(Command::Connect) => {
                        // an explicit connect restarts the retry budget
                        self.attempts = 0;
                        self.failures.clear();
                        self.connect().await;
                    }
                    Some(Command::Disconnect) => self.disconnect(),
                    None => break,
                },
                event = next_connection_event(&mut self.connection_events),
                    if self.connection_events.is_some() =>
                {
                    match event {
                        Some(ConnectionEvent::Message(text)) => self.on_message(&text).await,
                        Some(ConnectionEvent::Closed { reason }) => self.on_connection_lost(reason),
                        None => self.on_connection_lost(None),
                    }
                }
                Some(change) = self.changes.recv() => self.on_clipboard_change(change),
                _ = sleep_until(self.reconnect_at), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.connect().await;
                }
            }
        }
        debug!("sync engine stopped");
    }

    fn apply_config(&mut self, config: SyncConfig) {
        self.cipher = match config.password.as_deref() {
            Some(password) => match Cipher::from_password(password) {
                Ok(cipher) => Some(cipher),
                Err(e) => {
                    self.emit(SyncEvent::Error {
                        title: "Invalid encryption password".to_owned(),
                        detail: e.to_string(),
                    });
                    None
                }
            },
            None => None,
        };
        info!(address = %config.sanitized_address(), port = config.port, encrypted = self.cipher.is_some(), "configured");
        self.config = Some(config);
    }

    async fn connect(&mut self) {
        let Some(config) = self.config.clone() else {
            debug!("connect requested with no configured address");
            self.set_state(SyncState::Disconnected);
            return;
        };
        self.teardown_connection();
        self.reconnect_at = None;
        self.manual_disconnect = false;
        self.set_state(SyncState::Connecting);

        let url = config.ws_url();
        match Connection::connect(&url, self.policy.connect_timeout).await {
            Ok(connection) => {
                let (handle, events) = connection.split();
                self.connection = Some(handle);
                self.connection_events = Some(events);
                self.attempts = 0;
                self.failures.clear();
                self.set_state(SyncState::Connected);
            }
            Err(e) => {
                warn!(url, error = %e, "connection attempt failed");
                self.on_connection_lost(Some(e.to_string()));
            }
        }
    }

    fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.reconnect_at = None;
        // leave no retry budget in case a scheduled attempt is already racing
        self.attempts = self.policy.max_attempts;
        self.teardown_connection();
        self.set_state(SyncState::Disconnected);
    }

    fn on_connection_lost(&mut self, detail: Option<String>) {
        self.teardown_connection();
        if self.manual_disconnect {
            self.set_state(SyncState::Disconnected);
            return;
        }
        if let Some(detail) = detail {
            self.failures.push(detail);
        }
        let attempt = self.attempts;
        self.attempts += 1;
        if self.attempts >= self.policy.max_attempts {
            let detail = if self.failures.is_empty() {
                "connection lost".to_owned()
            } else {
                self.failures.join("; ")
            };
            self.emit(SyncEvent::Error {
                title: "Connection failed".to_owned(),
                detail,
            });
            self.failures.clear();
            self.set_state(SyncState::Disconnected);
            return;
        }
        self.reconnect_at = Some(Instant::now() + self.policy.delay(attempt));
        self.set_state(SyncState::Reconnecting);
    }

    async fn on_message(&mut self, raw: &str) {
        match protocol::decode(raw, self.cipher.as_ref()) {
            Ok(update) => {
                if update.source == self.source {
                    return;
                }
                // heartbeats and empty clipboards decode to empty text
                if update.plain_text.is_empty() {
                    return;
                }
                if self.last_received.as_deref() == Some(update.plain_text.as_str()) {
                    return;
                }
                self.last_received = Some(update.plain_text.clone());
                if let Err(e) = self
                    .clipboard
                    .write(&update.plain_text, update.html_text.as_deref())
                    .await
                {
                    self.emit(SyncEvent::Error {
                        title: "Clipboard write failed".to_owned(),
                        detail: e.to_string(),
                    });
                    return;
                }
                self.record(
                    update.plain_text.clone(),
                    update.timestamp,
                    update.source.clone(),
                    HistoryOrigin::Remote,
                );
                self.emit(SyncEvent::Applied { update });
            }
            Err(CodecError::Decryption(e)) => {
                self.emit(SyncEvent::Error {
                    title: "Decryption failed".to_owned(),
                    detail: format!("check that every device uses the same password: {e}"),
                });
            }
            Err(e) => debug!(error = %e, "dropping malformed message"),
        }
    }

    fn on_clipboard_change(&mut self, change: ClipboardSnapshot) {
        if self.state != SyncState::Connected {
            return;
        }
        if !self.should_send(&change.plain_text) {
            return;
        }
        let Some(connection) = &self.connection else {
            return;
        };
        let update = ClipboardUpdate::new(
            change.plain_text.clone(),
            change.html_text,
            self.source.clone(),
        );
        match protocol::encode(&update, self.cipher.as_ref()) {
            Ok(raw) => {
                if connection.send(raw).is_err() {
                    debug!("dropping clipboard change: connection already closed");
                    return;
                }
                self.last_sent = Some(update.plain_text.clone());
                self.record(
                    update.plain_text.clone(),
                    update.timestamp,
                    self.source.clone(),
                    HistoryOrigin::Local,
                );
                self.emit(SyncEvent::Sent {
                    plain_text: update.plain_text,
                });
            }
            Err(e) => warn!(error = %e, "failed to encode clipboard update"),
        }
    }

    /// Echo-loop suppression: never resend what we just sent or received.
    fn should_send(&self, text: &str) -> bool {
        !text.is_empty()
            && self.last_sent.as_deref() != Some(text)
            && self.last_received.as_deref() != Some(text)
    }

    fn teardown_connection(&mut self) {
        if let Some(handle) = self.connection.take() {
            handle.close();
        }
        self.connection_events = None;
    }

    fn set_state(&mut self, state: SyncState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "state transition");
            self.state = state;
            self.emit(SyncEvent::State(state));
        }
    }

    fn record(&mut self, text: String, timestamp: i64, source: String, origin: HistoryOrigin) {
        self.history.record(text, timestamp, source, origin);
        let _ = self.history_tx.send(self.history.items());
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_connection_event(
    events: &mut Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
) -> Option<ConnectionEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use pretty_assertions::assert_eq;

    fn engine() -> (SyncEngine, SyncHandle) {
        let (_tx, changes) = mpsc::channel(8);
        let clipboard = Arc::new(MemoryClipboard::new());
        let (engine, handle) = SyncEngine::new(clipboard, changes, ReconnectPolicy::default());
        (engine.with_source("test-device"), handle)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(30), Duration::from_secs(4));
    }

    #[test]
    fn should_send_suppresses_echo() {
        let (mut engine, _handle) = engine();
        assert!(engine.should_send("fresh"));

        engine.last_received = Some("received".to_owned());
        assert!(!engine.should_send("received"));

        engine.last_sent = Some("sent".to_owned());
        assert!(!engine.should_send("sent"));

        assert!(!engine.should_send(""));
        assert!(engine.should_send("still fresh"));
    }

    #[test]
    fn manual_disconnect_exhausts_retry_budget() {
        let (mut engine, _handle) = engine();
        engine.reconnect_at = Some(Instant::now() + Duration::from_secs(1));
        engine.disconnect();
        assert!(engine.manual_disconnect);
        assert_eq!(engine.reconnect_at, None);
        assert_eq!(engine.attempts, engine.policy.max_attempts);
        assert_eq!(engine.state, SyncState::Disconnected);
    }

    #[test]
    fn connection_loss_schedules_bounded_retries() {
        let (mut engine, _handle) = engine();
        engine.config = Some(SyncConfig::new("relay.example.com", 8000, false, None));

        engine.on_connection_lost(Some("refused".to_owned()));
        assert_eq!(engine.state, SyncState::Reconnecting);
        assert!(engine.reconnect_at.is_some());
        engine.reconnect_at = None;

        engine.on_connection_lost(Some("refused".to_owned()));
        assert_eq!(engine.state, SyncState::Reconnecting);
        engine.reconnect_at = None;

        // third consecutive failure is terminal
        engine.on_connection_lost(Some("refused".to_owned()));
        assert_eq!(engine.state, SyncState::Disconnected);
        assert_eq!(engine.reconnect_at, None);
    }

    #[test]
    fn loss_after_manual_disconnect_stays_disconnected() {
        let (mut engine, _handle) = engine();
        engine.disconnect();
        engine.on_connection_lost(Some("late close event".to_owned()));
        assert_eq!(engine.state, SyncState::Disconnected);
        assert_eq!(engine.reconnect_at, None);
    }
}
