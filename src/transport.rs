//! Transport abstraction the core runs against.
//!
//! Implemented by the hosting app (polling, push subscription, or hybrid).
//! The core only assumes the contract below; live delivery arrives over an
//! mpsc receiver whose drop ends the subscription.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::conversation::ConversationId;
use crate::types::message::{
    Attachment, Message, MessageId, ReplyPreview, SendState, UserId, is_local_id,
};

/// Buffer for live event delivery per subscription.
pub const LIVE_EVENT_CAPACITY: usize = 64;

/// A message as it arrives off the wire. Fields the engine cannot tolerate
/// missing are optional here; validation happens in [`MessageEnvelope::into_message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub id: Option<MessageId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub body: String,
    pub rich_body: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub server_seq: Option<u64>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default = "default_version")]
    pub version: u32,
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_version() -> u32 {
    1
}

// Kept in sync with the serde field defaults; in particular an envelope
// built with struct-update syntax carries version 1, same as one
// deserialized without a version field.
impl Default for MessageEnvelope {
    fn default() -> Self {
        Self {
            id: None,
            conversation_id: String::new(),
            sender_id: String::new(),
            sender_name: String::new(),
            body: String::new(),
            rich_body: None,
            created_at: None,
            server_seq: None,
            edited: false,
            version: default_version(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }
}

impl From<Message> for MessageEnvelope {
    fn from(message: Message) -> Self {
        Self {
            id: Some(message.id),
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            body: message.body,
            rich_body: message.rich_body,
            created_at: Some(message.created_at),
            server_seq: message.server_seq,
            edited: message.edited,
            version: message.version,
            reply_to: message.reply_to,
            attachments: message.attachments,
        }
    }
}

impl MessageEnvelope {
    /// Validate the envelope into a confirmed message. Returns `None` when
    /// the id or timestamp is missing, or the id sits in the client-local
    /// namespace; such events must never be inserted.
    pub fn into_message(self) -> Option<Message> {
        let id = self.id?;
        if is_local_id(&id) {
            return None;
        }
        let created_at = self.created_at?;
        Some(Message {
            id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            body: self.body,
            rich_body: self.rich_body,
            created_at,
            server_seq: self.server_seq,
            edited: self.edited,
            version: self.version,
            reply_to: self.reply_to,
            attachments: self.attachments,
            send_state: SendState::Confirmed,
        })
    }
}

/// One page of history. Pagination is message-id cursored: the request
/// cursor is the id of the oldest message the caller already holds, and
/// the page contains messages strictly older than it.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<MessageEnvelope>,
    pub has_more: bool,
}

/// Content of an outgoing message, kept around so a failed send can be
/// retried with the exact same payload.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub body: String,
    pub rich_body: Option<serde_json::Value>,
    pub attachments: Vec<Attachment>,
    pub reply_to: Option<ReplyPreview>,
}

/// Events pushed by the live subscription, one variant per callback channel.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Message(MessageEnvelope),
    Edited {
        id: MessageId,
        body: String,
        rich_body: Option<serde_json::Value>,
        version: u32,
    },
    Deleted {
        id: MessageId,
    },
    Typing {
        user_id: UserId,
        name: String,
        is_typing: bool,
    },
    ReadReceipt {
        message_id: MessageId,
        reader_id: UserId,
        read_at: DateTime<Utc>,
    },
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch the page of history strictly before the message with id
    /// `before_cursor` (`None` = latest).
    async fn fetch_page(
        &self,
        conversation_id: &ConversationId,
        before_cursor: Option<String>,
        page_size: usize,
    ) -> Result<Page, anyhow::Error>;

    /// Open a live subscription. Dropping the receiver unsubscribes.
    async fn subscribe(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<mpsc::Receiver<LiveEvent>, anyhow::Error>;

    /// Persist an outgoing message; returns the confirmed message with its
    /// canonical id and server timestamp.
    async fn send_message(
        &self,
        conversation_id: &ConversationId,
        outgoing: &OutgoingMessage,
    ) -> Result<Message, anyhow::Error>;

    async fn send_typing_signal(
        &self,
        conversation_id: &ConversationId,
        is_typing: bool,
    ) -> Result<(), anyhow::Error>;

    /// Record the viewer as having read everything up to a message.
    async fn mark_read(
        &self,
        conversation_id: &ConversationId,
        up_to: &MessageId,
    ) -> Result<(), anyhow::Error>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_without_id_is_rejected() {
        let envelope = MessageEnvelope {
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(envelope.into_message().is_none());
    }

    #[test]
    fn test_envelope_without_timestamp_is_rejected() {
        let envelope = MessageEnvelope {
            id: Some("srv-1".to_string()),
            ..Default::default()
        };
        assert!(envelope.into_message().is_none());
    }

    #[test]
    fn test_envelope_with_local_namespace_id_is_rejected() {
        let envelope = MessageEnvelope {
            id: Some("local-deadbeef".to_string()),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        assert!(envelope.into_message().is_none());
    }

    #[test]
    fn test_default_envelope_version_matches_wire_default() {
        assert_eq!(MessageEnvelope::default().version, 1);
        let msg = MessageEnvelope {
            id: Some("srv-1".to_string()),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
        .into_message()
        .expect("valid envelope");
        assert_eq!(msg.version, 1);
    }

    #[test]
    fn test_valid_envelope_becomes_confirmed_message() {
        let envelope = MessageEnvelope {
            id: Some("srv-1".to_string()),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-2".to_string(),
            sender_name: "Alex".to_string(),
            body: "on my way".to_string(),
            created_at: Some(Utc::now()),
            server_seq: Some(42),
            ..Default::default()
        };
        let msg = envelope.into_message().expect("valid envelope");
        assert_eq!(msg.send_state, SendState::Confirmed);
        assert_eq!(msg.id, "srv-1");
        assert_eq!(msg.server_seq, Some(42));
    }
}
