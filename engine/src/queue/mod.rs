//! Message queue
//!
//! Thread-safe FIFO of messages waiting to be injected into the conversation.
//! Background task completions and external injection points produce entries;
//! the turn loop consumes them in its CheckingQueue state.

use chrono::{DateTime, Utc};
use sdk::types::Message;
use std::collections::VecDeque;
use std::sync::RwLock;

/// A message waiting for the turn loop
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub message: Message,
    /// Request that produced the message
    pub request_id: String,
    pub queued_at: DateTime<Utc>,
}

/// FIFO of pending messages
///
/// All operations take the lock for the duration of a single call only.
#[derive(Debug, Default)]
pub struct MessageQueue {
    entries: RwLock<VecDeque<QueuedMessage>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to the back of the queue
    pub fn enqueue(&self, message: Message, request_id: impl Into<String>) {
        let entry = QueuedMessage {
            message,
            request_id: request_id.into(),
            queued_at: Utc::now(),
        };

        let size = {
            let mut entries = self.entries.write().expect("MessageQueue lock poisoned");
            entries.push_back(entry);
            entries.len()
        };

        tracing::debug!(size, "Message enqueued");
    }

    /// Remove and return the oldest message
    pub fn dequeue(&self) -> Option<QueuedMessage> {
        self.entries
            .write()
            .expect("MessageQueue lock poisoned")
            .pop_front()
    }

    /// Return the oldest message without removing it
    pub fn peek(&self) -> Option<QueuedMessage> {
        self.entries
            .read()
            .expect("MessageQueue lock poisoned")
            .front()
            .cloned()
    }

    pub fn size(&self) -> usize {
        self.entries.read().expect("MessageQueue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .expect("MessageQueue lock poisoned")
            .is_empty()
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .expect("MessageQueue lock poisoned")
            .clear();
    }

    /// Point-in-time copy of every queued message, oldest first
    pub fn get_all(&self) -> Vec<QueuedMessage> {
        self.entries
            .read()
            .expect("MessageQueue lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}
