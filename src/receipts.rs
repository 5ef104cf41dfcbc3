//! Read receipt aggregator.
//!
//! Sparse, per-conversation: only the conversation being viewed accumulates
//! receipts, keyed by message id for O(1) lookup during rendering. The log
//! is discarded on conversation switch and refetched.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::message::{Message, MessageId, UserId};
use crate::types::presence::ReadReceipt;

#[derive(Default)]
pub struct ReadReceiptLog {
    /// message id -> reader -> first read-at.
    receipts: HashMap<MessageId, HashMap<UserId, DateTime<Utc>>>,
    /// Senders per message, so an author's own implicit receipt is never
    /// shown on their message.
    senders: HashMap<MessageId, UserId>,
}

impl ReadReceiptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message's sender; called as messages enter the list.
    pub fn observe_message(&mut self, message: &Message) {
        self.senders
            .insert(message.id.clone(), message.sender_id.clone());
    }

    /// Record that `reader_id` read a message. The first read-at wins; the
    /// sender's own receipt is dropped. Returns whether the display set for
    /// that message changed.
    pub fn record_read(&mut self, message_id: &str, reader_id: UserId, at: DateTime<Utc>) -> bool {
        if self
            .senders
            .get(message_id)
            .is_some_and(|sender| *sender == reader_id)
        {
            return false;
        }
        self.receipts
            .entry(message_id.to_string())
            .or_default()
            .insert(reader_id, at)
            .is_none()
    }

    /// Readers of a message, sender excluded, sorted for stable display.
    pub fn readers_of(&self, message_id: &str) -> Vec<UserId> {
        let mut readers: Vec<UserId> = self
            .receipts
            .get(message_id)
            .map(|by_reader| by_reader.keys().cloned().collect())
            .unwrap_or_default();
        readers.sort();
        readers
    }

    /// Full receipt records for a message, e.g. for a "seen by" tooltip.
    pub fn receipts_of(&self, message_id: &str) -> Vec<ReadReceipt> {
        let mut records: Vec<ReadReceipt> = self
            .receipts
            .get(message_id)
            .map(|by_reader| {
                by_reader
                    .iter()
                    .map(|(reader_id, read_at)| ReadReceipt {
                        message_id: message_id.to_string(),
                        reader_id: reader_id.clone(),
                        read_at: *read_at,
                    })
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|a, b| a.read_at.cmp(&b.read_at).then_with(|| a.reader_id.cmp(&b.reader_id)));
        records
    }

    /// Drop everything; used when switching conversations.
    pub fn clear(&mut self) {
        self.receipts.clear();
        self.senders.clear();
    }
}
