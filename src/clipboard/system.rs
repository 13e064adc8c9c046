//! System clipboard backed by arboard
//!
//! arboard's handle is not `Send`, so every operation opens a fresh handle on
//! the blocking pool. Reads return plain text only; HTML readback is not
//! portable across platforms, while HTML writes are.

use async_trait::async_trait;

use super::{Clipboard, ClipboardError, ClipboardSnapshot};

/// Platform clipboard provider
#[derive(Debug, Default)]
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl From<arboard::Error> for ClipboardError {
    fn from(e: arboard::Error) -> Self {
        ClipboardError::Backend(e.to_string())
    }
}

async fn blocking<T, F>(op: F) -> Result<T, ClipboardError>
where
    T: Send + 'static,
    F: FnOnce(&mut arboard::Clipboard) -> Result<T, arboard::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut clipboard = arboard::Clipboard::new()?;
        op(&mut clipboard)
    })
    .await
    .map_err(|e| ClipboardError::Backend(e.to_string()))?
    .map_err(ClipboardError::from)
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn read(&self) -> Result<Option<ClipboardSnapshot>, ClipboardError> {
        let text = blocking(|clipboard| match clipboard.get_text() {
            Ok(text) => Ok(Some(text)),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(e),
        })
        .await?;
        Ok(text.map(ClipboardSnapshot::text))
    }

    async fn write(
        &self,
        plain_text: &str,
        html_text: Option<&str>,
    ) -> Result<(), ClipboardError> {
        let plain = plain_text.to_owned();
        let html = html_text.map(str::to_owned);
        blocking(move |clipboard| match html {
            Some(html) => clipboard.set_html(html, Some(plain)),
            None => clipboard.set_text(plain),
        })
        .await
    }
}
