//! Broadcast relay
//!
//! The hub owns the set of live connections and forwards every inbound
//! message, unparsed, to all other connections. It keeps no history and no
//! cross-session state: a client that connects after a broadcast never sees
//! it. Staying schema-agnostic means the relay works unchanged whether peers
//! encrypt or not.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol;
use crate::transport::{Connection, ConnectionEvent, ConnectionHandle, Result};

/// Interval between relay-originated heartbeat frames.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Set of currently-open connections with exclude-sender broadcast
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: ConnectionHandle) {
        let mut connections = self.connections.write().await;
        connections.insert(handle.id(), handle);
        info!(total = connections.len(), "connection attached");
    }

    pub async fn remove(&self, id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(&id).is_some() {
            info!(total = connections.len(), "connection detached");
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Forward raw text to every connection except `sender`.
    ///
    /// The handle set is snapshotted under the read lock and released before
    /// sending, so a connection closing mid-broadcast cannot corrupt
    /// iteration. Each send is a non-blocking queue push; a slow recipient
    /// never delays the others.
    pub async fn broadcast(&self, sender: Option<Uuid>, text: &str) {
        let targets: Vec<ConnectionHandle> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|handle| Some(handle.id()) != sender)
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            debug!("no other clients connected to receive broadcast");
            return;
        }
        for handle in targets {
            if handle.send(text.to_owned()).is_err() {
                // already closed; the reader task handles removal
                debug!(connection = %handle.id(), "skipping closed connection");
            }
        }
    }
}

/// The relay server: accept loop plus heartbeat
pub struct Relay {
    listener: TcpListener,
    hub: Arc<Hub>,
}

impl Relay {
    /// Bind the listening socket. Use port 0 for an ephemeral port.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            hub: Arc::new(Hub::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<Hub> {
        Arc::clone(&self.hub)
    }

    /// Accept connections until the process is stopped.
    pub async fn run(self) -> Result<()> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "relay listening");
        }

        let heartbeat_hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            // skip the immediate first tick so fresh connections settle
            let start = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
            let mut ticks = tokio::time::interval_at(start, HEARTBEAT_INTERVAL);
            loop {
                ticks.tick().await;
                if !heartbeat_hub.is_empty().await {
                    heartbeat_hub.broadcast(None, &protocol::heartbeat()).await;
                }
            }
        });

        loop {
            let (stream, peer_addr) = self.listener.accept().await?;
            let hub = Arc::clone(&self.hub);
            tokio::spawn(async move {
                match Connection::accept(stream).await {
                    Ok(connection) => serve_connection(hub, connection).await,
                    Err(e) => warn!(%peer_addr, error = %e, "websocket handshake failed"),
                }
            });
        }
    }
}

/// Drive one attached connection: register, pump messages, deregister.
async fn serve_connection(hub: Arc<Hub>, mut connection: Connection) {
    let handle = connection.handle();
    let id = handle.id();
    hub.insert(handle).await;

    while let Some(event) = connection.next_event().await {
        match event {
            ConnectionEvent::Message(text) => hub.broadcast(Some(id), &text).await,
            ConnectionEvent::Closed { reason } => {
                debug!(connection = %id, ?reason, "relay connection closed");
                break;
            }
        }
    }

    hub.remove(id).await;
}
