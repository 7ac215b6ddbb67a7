//! Chat message model

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Sender name used for lines generated by the lobby itself
pub const SYSTEM_SENDER: &str = "system";

/// One chat line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Milliseconds since an arbitrary monotonic epoch
    pub timestamp_ms: u64,
    pub from: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(timestamp_ms: u64, from: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            timestamp_ms,
            from: from.into(),
            text: text.into(),
        }
    }

    /// A line generated by the lobby (joins, kicks, startup)
    pub fn system(timestamp_ms: u64, text: impl Into<String>) -> Self {
        Self::new(timestamp_ms, SYSTEM_SENDER, text)
    }

    pub fn is_system(&self) -> bool {
        self.from == SYSTEM_SENDER
    }
}

/// Caller-side chat log with a retention cap.
///
/// The protocol queues are unbounded; front-ends keep what they display here.
#[derive(Debug, Clone)]
pub struct ChatHistory {
    entries: VecDeque<ChatMessage>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, msg: ChatMessage) {
        self.entries.push_back(msg);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Extend<ChatMessage> for ChatHistory {
    fn extend<I: IntoIterator<Item = ChatMessage>>(&mut self, iter: I) {
        for msg in iter {
            self.push(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message() {
        let msg = ChatMessage::system(5, "Lobby started");
        assert!(msg.is_system());
        assert!(!ChatMessage::new(5, "bob", "hi").is_system());
    }

    #[test]
    fn test_history_drops_oldest() {
        let mut history = ChatHistory::new(3);
        history.extend((0..5).map(|i| ChatMessage::new(i, "bob", format!("line {}", i))));

        assert_eq!(history.len(), 3);
        let texts: Vec<_> = history.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }
}
