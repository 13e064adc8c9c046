//! WebSocket connection implementation
//!
//! Each accepted or dialed socket is split into two tasks: a writer draining
//! an unbounded outbound queue (so callers never block on a slow peer) and a
//! reader pushing inbound text into an event channel. The reader answers
//! protocol pings itself and emits a terminal `Closed` event exactly once.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{accept_hdr_async, connect_async, WebSocketStream};
use tracing::{debug, trace};
use uuid::Uuid;

use super::{ConnectionState, Result, TransportError, WS_PATH};

/// Inbound happenings on one connection
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A complete text message arrived
    Message(String),
    /// The connection is gone; terminal, emitted exactly once
    Closed { reason: Option<String> },
}

enum Outbound {
    Text(String),
    Pong(Bytes),
    Close,
}

/// Cloneable send/close side of a connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Outbound>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Unique identifier for this connection's lifetime.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a text message; returns immediately, never blocks on the peer.
    pub fn send(&self, text: String) -> Result<()> {
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    /// Request a normal closure.
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// One open bidirectional channel
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Connection {
    /// Dial a relay with a per-attempt timeout.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        let (ws, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout)??;
        debug!(url, "websocket connected");
        Ok(spawn_io(ws))
    }

    /// Accept an inbound socket, upgrading only requests for [`WS_PATH`].
    pub async fn accept(stream: TcpStream) -> Result<Self> {
        let check_path = |req: &Request, response: Response| {
            if req.uri().path() == WS_PATH {
                Ok(response)
            } else {
                let mut not_found = ErrorResponse::new(None);
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Err(not_found)
            }
        };
        let ws = accept_hdr_async(stream, check_path).await?;
        Ok(spawn_io(ws))
    }

    /// The cloneable send/close side.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Wait for the next inbound event. Returns `None` after the terminal
    /// `Closed` event has been consumed.
    pub async fn next_event(&mut self) -> Option<ConnectionEvent> {
        self.events.recv().await
    }

    /// Split into the send handle and the raw event receiver.
    pub fn split(self) -> (ConnectionHandle, mpsc::UnboundedReceiver<ConnectionEvent>) {
        (self.handle, self.events)
    }
}

fn spawn_io<S>(ws: WebSocketStream<S>) -> Connection
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Open);

    // Writer: drain the queue until close is requested or the sink dies.
    tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            let message = match outbound {
                Outbound::Text(text) => WsMessage::Text(text.into()),
                Outbound::Pong(payload) => WsMessage::Pong(payload),
                Outbound::Close => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "closing".into(),
                    };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    // Reader: forward text, answer pings, emit one terminal Closed event.
    let pong_tx = outbound_tx.clone();
    tokio::spawn(async move {
        let reason = loop {
            match stream.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    trace!(connection = %id, len = text.len(), "inbound message");
                    if event_tx
                        .send(ConnectionEvent::Message(text.as_str().to_owned()))
                        .is_err()
                    {
                        break None;
                    }
                }
                Some(Ok(WsMessage::Ping(payload))) => {
                    let _ = pong_tx.send(Outbound::Pong(payload));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame.and_then(|f| {
                        let text = f.reason.as_str().to_owned();
                        (!text.is_empty()).then_some(text)
                    });
                }
                Some(Ok(_)) => {} // binary and pong frames are ignored
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        debug!(connection = %id, ?reason, "connection closed");
        let _ = state_tx.send(ConnectionState::Closed);
        let _ = event_tx.send(ConnectionEvent::Closed { reason });
    });

    Connection {
        handle: ConnectionHandle {
            id,
            outbound: outbound_tx,
            state: state_rx,
        },
        events: event_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn pair() -> (Connection, Connection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            Connection::accept(stream).await.unwrap()
        });
        let client = Connection::connect(
            &format!("ws://{addr}/ws"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        (client, server.await.unwrap())
    }

    #[tokio::test]
    async fn text_roundtrip_and_close() {
        let (client, mut server) = pair().await;
        assert_eq!(client.handle().state(), ConnectionState::Open);

        client.handle().send("hello".to_owned()).unwrap();
        match server.next_event().await.unwrap() {
            ConnectionEvent::Message(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }

        client.handle().close();
        match server.next_event().await.unwrap() {
            ConnectionEvent::Closed { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn wrong_path_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = Connection::accept(stream).await;
        });
        let result = Connection::connect(
            &format!("ws://{addr}/not-ws"),
            Duration::from_secs(5),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn connect_times_out_against_silent_host() {
        // A bound-but-unaccepted listener completes TCP but never handshakes.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let result =
            Connection::connect(&format!("ws://{addr}/ws"), Duration::from_millis(200)).await;
        assert!(matches!(result, Err(TransportError::Timeout)));
        drop(listener);
    }
}
