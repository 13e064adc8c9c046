//! Clipboard collaborator contract
//!
//! The sync engine treats the platform clipboard as an opaque capability:
//! read a snapshot, write one, and get notified of changes. Notification is a
//! polling watcher because no platform offers a portable change event.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::debug;

pub mod memory;
pub mod system;

pub use memory::MemoryClipboard;
pub use system::SystemClipboard;

/// Default polling interval for the change watcher.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// Platform clipboard backend failure
    #[error("clipboard backend error: {0}")]
    Backend(String),
}

/// A point-in-time view of the clipboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardSnapshot {
    pub plain_text: String,
    pub html_text: Option<String>,
}

impl ClipboardSnapshot {
    pub fn text(plain_text: impl Into<String>) -> Self {
        Self {
            plain_text: plain_text.into(),
            html_text: None,
        }
    }
}

/// Platform clipboard capability
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Current content, or `None` when the clipboard is empty.
    async fn read(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError>;

    /// Replace the clipboard content.
    async fn write(&self, plain_text: &str, html_text: Option<&str>)
        -> Result<(), ClipboardError>;
}

/// Spawn a polling watcher emitting a snapshot whenever the plain text
/// changes. The first observed content primes the comparison state without
/// emitting, so startup content is not treated as a fresh copy.
pub fn watch_clipboard(
    clipboard: Arc<dyn Clipboard>,
    poll_interval: Duration,
) -> mpsc::Receiver<ClipboardSnapshot> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut last_seen: Option<String> = None;
        let mut primed = false;
        let mut ticks = tokio::time::interval(poll_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            match clipboard.read().await {
                Ok(Some(snapshot)) => {
                    if snapshot.plain_text.is_empty()
                        || last_seen.as_deref() == Some(snapshot.plain_text.as_str())
                    {
                        continue;
                    }
                    last_seen = Some(snapshot.plain_text.clone());
                    if !primed {
                        primed = true;
                        continue;
                    }
                    if tx.send(snapshot).await.is_err() {
                        break;
                    }
                }
                Ok(None) => primed = true,
                Err(e) => debug!(error = %e, "clipboard read failed"),
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watcher_emits_on_change_only() {
        let clipboard = Arc::new(MemoryClipboard::new());
        clipboard.write("initial", None).await.unwrap();

        let mut changes =
            watch_clipboard(clipboard.clone() as Arc<dyn Clipboard>, Duration::from_millis(10));

        // startup content primes, a later write is a change
        tokio::time::sleep(Duration::from_millis(50)).await;
        clipboard.write("copied", None).await.unwrap();

        let change = tokio::time::timeout(Duration::from_secs(1), changes.recv())
            .await
            .expect("watcher should emit")
            .expect("channel open");
        assert_eq!(change.plain_text, "copied");

        // unchanged content does not re-emit
        let idle = tokio::time::timeout(Duration::from_millis(100), changes.recv()).await;
        assert!(idle.is_err());
    }
}
