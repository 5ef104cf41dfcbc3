//! Message synchronization engine.
//!
//! Owns the ordered message list for one conversation and merges paginated
//! history with live events. All mutation funnels through the `apply_*`
//! methods; no other component touches the list directly.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::ChatError;
use crate::transport::{MessageEnvelope, Page};
use crate::types::conversation::ConversationId;
use crate::types::events::ListChange;
use crate::types::message::{Message, MessageId, SendState, is_local_id};

/// Tie-break values for entries without a server sequence start here, so
/// that seq-bearing entries with the same timestamp sort ahead of local
/// ones and insertion order is preserved among the rest.
const LOCAL_TIE_BASE: u64 = 1 << 48;

pub struct SyncEngine {
    conversation_id: ConversationId,
    /// Ascending by (created_at, tie).
    messages: Vec<Message>,
    /// Tie-break value per stored entry: server_seq when present, else an
    /// arrival counter.
    ties: HashMap<MessageId, u64>,
    arrival_counter: u64,
    has_more: bool,
    max_retained: usize,
}

impl SyncEngine {
    pub fn new(conversation_id: ConversationId, max_retained: usize) -> Self {
        Self {
            conversation_id,
            messages: Vec::new(),
            ties: HashMap::new(),
            arrival_counter: 0,
            has_more: true,
            max_retained,
        }
    }

    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// The canonical ordered view.
    pub fn ordered_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Whether older history exists beyond what is loaded.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for the next older page: the id of the oldest loaded message
    /// with a canonical id. Derived rather than stored, so a retention trim
    /// can never leave the cursor pointing below entries that were dropped.
    /// `None` before anything is loaded (fetch the latest page).
    pub fn next_cursor(&self) -> Option<String> {
        if !self.has_more {
            return None;
        }
        self.messages
            .iter()
            .find(|m| !is_local_id(&m.id))
            .map(|m| m.id.clone())
    }

    /// Newest confirmed id, the mark-read watermark.
    pub fn latest_confirmed_id(&self) -> Option<&MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.send_state == SendState::Confirmed)
            .map(|m| &m.id)
    }

    /// True once no optimistic entries remain in the list.
    pub fn fully_settled(&self) -> bool {
        self.messages.iter().all(|m| !m.is_pending())
    }

    /// Merge one page of history. Malformed items are logged and skipped
    /// per-item; already-known ids are ignored. Returns how many messages
    /// were actually inserted.
    pub fn apply_page(&mut self, page: Page) -> usize {
        let mut inserted = 0;
        for envelope in page.messages {
            if self.merge_envelope(envelope) {
                inserted += 1;
            }
        }
        self.has_more = page.has_more;
        self.enforce_retention();
        debug!(target: "Sync", "conversation {}: merged page, {} new, {} total",
            self.conversation_id, inserted, self.messages.len());
        inserted
    }

    /// Insert one live incoming message, retention cap enforced. Idempotent:
    /// a message whose canonical id is already present is a no-op. Malformed
    /// events are dropped and logged, never inserted. Returns whether the
    /// list changed.
    pub fn apply_incoming(&mut self, envelope: MessageEnvelope) -> bool {
        let changed = self.merge_envelope(envelope);
        if changed {
            self.enforce_retention();
        }
        changed
    }

    fn merge_envelope(&mut self, envelope: MessageEnvelope) -> bool {
        let Some(message) = envelope.into_message() else {
            warn!(target: "Sync", "conversation {}: dropping malformed incoming event (missing id or timestamp)",
                self.conversation_id);
            return false;
        };
        if self.ties.contains_key(&message.id) {
            return false;
        }
        self.insert_sorted(message);
        true
    }

    /// Insert a locally-created optimistic entry. Only the send pipeline
    /// calls this; the entry must carry a `local-` id and a pending state.
    pub(crate) fn insert_local(&mut self, message: Message) {
        debug_assert!(message.is_pending());
        debug_assert!(crate::types::message::is_local_id(&message.id));
        self.insert_sorted(message);
    }

    /// Replace an optimistic entry with its server-confirmed counterpart.
    /// Reports whether the swap kept the entry in place or moved it, so the
    /// caller can animate the move. If the canonical message already arrived
    /// via the live subscription, the temp entry is simply removed.
    pub(crate) fn reconcile(
        &mut self,
        temp_id: &str,
        confirmed: Message,
    ) -> Result<ListChange, ChatError> {
        let old_pos = self
            .position_of(temp_id)
            .ok_or_else(|| ChatError::UnknownMessage(temp_id.to_string()))?;
        self.messages.remove(old_pos);
        self.ties.remove(temp_id);

        if self.ties.contains_key(&confirmed.id) {
            // Live delivery beat the send acknowledgement; the canonical
            // entry is already in the list.
            return Ok(ListChange::Removed);
        }

        let new_pos = self.insert_sorted(confirmed);
        if new_pos == old_pos {
            Ok(ListChange::Updated)
        } else {
            Ok(ListChange::Reordered)
        }
    }

    /// Flip an in-flight optimistic entry to `Failed`, keeping its content.
    pub(crate) fn mark_failed(&mut self, temp_id: &str) -> Result<(), ChatError> {
        self.with_message_mut(temp_id, |m| m.send_state = SendState::Failed)
    }

    /// Flip a failed entry back to `Sending` for a retry attempt.
    pub(crate) fn mark_sending(&mut self, temp_id: &str) -> Result<(), ChatError> {
        self.with_message_mut(temp_id, |m| m.send_state = SendState::Sending)
    }

    /// Optimistic-concurrency edit. Rejected when `expected_version` does
    /// not match the stored version; the caller must refetch and retry.
    pub fn apply_edit(
        &mut self,
        id: &str,
        new_body: String,
        new_rich_body: Option<serde_json::Value>,
        expected_version: u32,
    ) -> Result<(), ChatError> {
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| ChatError::UnknownMessage(id.to_string()))?;
        if message.version != expected_version {
            return Err(ChatError::Conflict {
                expected: expected_version,
                actual: message.version,
            });
        }
        message.body = new_body;
        message.rich_body = new_rich_body;
        message.version += 1;
        message.edited = true;
        Ok(())
    }

    /// Edit pushed by the server, carrying the authoritative version. Older
    /// or duplicate versions are ignored.
    pub fn apply_remote_edit(
        &mut self,
        id: &str,
        body: String,
        rich_body: Option<serde_json::Value>,
        version: u32,
    ) -> bool {
        let Some(message) = self.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        if version <= message.version {
            return false;
        }
        message.body = body;
        message.rich_body = rich_body;
        message.version = version;
        message.edited = true;
        true
    }

    /// Remove a message. Returns whether anything was removed.
    pub fn apply_delete(&mut self, id: &str) -> bool {
        match self.position_of(id) {
            Some(pos) => {
                self.messages.remove(pos);
                self.ties.remove(id);
                true
            }
            None => false,
        }
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn with_message_mut(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Message),
    ) -> Result<(), ChatError> {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(m) => {
                f(m);
                Ok(())
            }
            None => Err(ChatError::UnknownMessage(id.to_string())),
        }
    }

    /// Insert maintaining (created_at, tie) order; returns the position.
    /// Handles out-of-order history pages and late live deliveries alike.
    fn insert_sorted(&mut self, message: Message) -> usize {
        let tie = match message.server_seq {
            Some(seq) => seq,
            None => {
                self.arrival_counter += 1;
                LOCAL_TIE_BASE + self.arrival_counter
            }
        };
        self.ties.insert(message.id.clone(), tie);
        let key = (message.created_at, tie);
        let pos = self
            .messages
            .binary_search_by(|m| {
                let m_tie = self.ties.get(&m.id).copied().unwrap_or(u64::MAX);
                (m.created_at, m_tie).cmp(&key)
            })
            .unwrap_or_else(|pos| pos);
        self.messages.insert(pos, message);
        pos
    }

    /// Keep the newest `max_retained` messages. Trimming drops the oldest
    /// entries and re-exposes `has_more`; the page cursor re-derives from
    /// the oldest retained entry, so the trimmed range re-pages without a
    /// gap.
    fn enforce_retention(&mut self) {
        if self.messages.len() <= self.max_retained {
            return;
        }
        let excess = self.messages.len() - self.max_retained;
        for dropped in self.messages.drain(..excess) {
            self.ties.remove(&dropped.id);
        }
        self.has_more = true;
        debug!(target: "Sync", "conversation {}: retention trimmed {} oldest messages",
            self.conversation_id, excess);
    }
}
