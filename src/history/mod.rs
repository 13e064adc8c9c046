//! Bounded clipboard history
//!
//! A small newest-first list kept by the sync engine and handed to the
//! external settings store for persistence. Re-adding existing text moves it
//! to the front instead of duplicating; the oldest entry is evicted past the
//! cap. This is the only entity in the system with a retention policy.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum number of retained history entries.
pub const HISTORY_CAPACITY: usize = 5;

/// Where a history entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryOrigin {
    /// Copied on this device and sent out
    Local,
    /// Received from a remote peer and applied here
    Remote,
}

/// One retained clipboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    /// The clipboard text
    pub text: String,
    /// Milliseconds since epoch when the entry was recorded
    pub timestamp: i64,
    /// Origin tag from the update (`"desktop"`, `"phone"`, ...)
    pub source: String,
    /// Local or remote provenance
    pub origin: HistoryOrigin,
}

/// Newest-first, deduplicated, capacity-bounded history list
#[derive(Debug, Default)]
pub struct ClipboardHistory {
    items: VecDeque<HistoryItem>,
}

impl ClipboardHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry, deduplicating by exact text match.
    pub fn record(&mut self, text: String, timestamp: i64, source: String, origin: HistoryOrigin) {
        self.items.retain(|item| item.text != text);
        self.items.push_front(HistoryItem {
            text,
            timestamp,
            source,
            origin,
        });
        self.items.truncate(HISTORY_CAPACITY);
    }

    /// Current entries, newest first.
    pub fn items(&self) -> Vec<HistoryItem> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
