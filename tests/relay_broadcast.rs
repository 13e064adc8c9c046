//! Relay hub broadcast properties

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tailsync::protocol::{self, ClipboardUpdate};
use tailsync::relay::{Hub, Relay};
use tailsync::transport::{Connection, ConnectionEvent};

async fn start_relay() -> (SocketAddr, Arc<Hub>) {
    let relay = Relay::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = relay.local_addr().expect("local addr");
    let hub = relay.hub();
    tokio::spawn(relay.run());
    (addr, hub)
}

async fn connect(addr: SocketAddr) -> Connection {
    Connection::connect(&format!("ws://{addr}/ws"), Duration::from_secs(5))
        .await
        .expect("connect to relay")
}

async fn wait_for_attached(hub: &Hub, count: usize) {
    for _ in 0..100 {
        if hub.len().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("relay never reached {count} attached connections");
}

async fn recv_text(connection: &mut Connection, within: Duration) -> Option<String> {
    match tokio::time::timeout(within, connection.next_event()).await {
        Ok(Some(ConnectionEvent::Message(text))) => Some(text),
        _ => None,
    }
}

fn sample_message(text: &str) -> String {
    let update = ClipboardUpdate::new(text.to_owned(), None, "desktop".to_owned());
    protocol::encode(&update, None).expect("encode")
}

#[tokio::test]
async fn broadcast_reaches_everyone_except_the_sender() {
    let (addr, hub) = start_relay().await;
    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_attached(&hub, 3).await;

    let message = sample_message("hello");
    a.handle().send(message.clone()).expect("send");

    assert_eq!(
        recv_text(&mut b, Duration::from_secs(2)).await.as_deref(),
        Some(message.as_str())
    );
    assert_eq!(
        recv_text(&mut c, Duration::from_secs(2)).await.as_deref(),
        Some(message.as_str())
    );

    // the sender must never see its own message again
    assert_eq!(recv_text(&mut a, Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn relay_keeps_no_history_for_late_joiners() {
    let (addr, hub) = start_relay().await;
    let a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_attached(&hub, 2).await;

    a.handle().send(sample_message("before you arrived")).expect("send");
    assert!(recv_text(&mut b, Duration::from_secs(2)).await.is_some());

    let mut late = connect(addr).await;
    wait_for_attached(&hub, 3).await;
    assert_eq!(recv_text(&mut late, Duration::from_millis(300)).await, None);
}

#[tokio::test]
async fn closed_connection_is_removed_and_broadcast_continues() {
    let (addr, hub) = start_relay().await;
    let a = connect(addr).await;
    let b = connect(addr).await;
    let mut c = connect(addr).await;
    wait_for_attached(&hub, 3).await;

    b.handle().close();
    wait_for_attached(&hub, 2).await;

    let message = sample_message("still flowing");
    a.handle().send(message.clone()).expect("send");
    assert_eq!(
        recv_text(&mut c, Duration::from_secs(2)).await.as_deref(),
        Some(message.as_str())
    );
}

#[tokio::test]
async fn relay_forwards_bytes_unmodified() {
    // the hub is a dumb pipe: opaque (even non-JSON) payloads pass through
    let (addr, hub) = start_relay().await;
    let a = connect(addr).await;
    let mut b = connect(addr).await;
    wait_for_attached(&hub, 2).await;

    let opaque = "gAAAAABnot-actually-json";
    a.handle().send(opaque.to_owned()).expect("send");
    assert_eq!(
        recv_text(&mut b, Duration::from_secs(2)).await.as_deref(),
        Some(opaque)
    );
}
