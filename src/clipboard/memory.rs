//! In-memory clipboard for tests and headless runs

use async_trait::async_trait;
use std::sync::Mutex;

use super::{Clipboard, ClipboardError, ClipboardSnapshot};

/// A process-local clipboard that records every write
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    content: Mutex<Option<ClipboardSnapshot>>,
    writes: Mutex<Vec<ClipboardSnapshot>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every snapshot written so far, oldest first.
    pub fn writes(&self) -> Vec<ClipboardSnapshot> {
        self.writes.lock().expect("clipboard lock poisoned").clone()
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn read(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError> {
        Ok(self.content.lock().expect("clipboard lock poisoned").clone())
    }

    async fn write(
        &self,
        plain_text: &str,
        html_text: Option<&str>,
    ) -> Result<(), ClipboardError> {
        let snapshot = ClipboardSnapshot {
            plain_text: plain_text.to_owned(),
            html_text: html_text.map(str::to_owned),
        };
        *self.content.lock().expect("clipboard lock poisoned") = Some(snapshot.clone());
        self.writes
            .lock()
            .expect("clipboard lock poisoned")
            .push(snapshot);
        Ok(())
    }
}
