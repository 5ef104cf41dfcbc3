use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

pub type MessageId = String;
pub type UserId = String;

/// Namespace prefix for client-generated message ids. A message that has not
/// been confirmed by the server always carries an id in this namespace and is
/// never persisted remotely under it.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh temporary message id (`local-` prefix + random hex).
pub fn new_local_id() -> MessageId {
    let mut bytes = [0u8; 8];
    rand::rng().fill_bytes(&mut bytes);
    format!("{}{}", LOCAL_ID_PREFIX, hex::encode(bytes))
}

/// Whether an id belongs to the client-generated temporary namespace.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Delivery state of a message as seen by the local client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendState {
    /// Persisted remotely under a canonical id.
    Confirmed,
    /// Optimistic local entry, remote write in flight.
    Sending,
    /// Remote write failed; entry stays visible for manual retry.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Video,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Processing,
    Ready,
}

/// Descriptor returned by the upload collaborator. The core carries these
/// as-is; it never touches attachment bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub url: String,
    pub kind: AttachmentKind,
    pub size_bytes: u64,
    pub status: AttachmentStatus,
}

/// Denormalized snapshot of a reply target, so a replying message renders
/// without a second lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPreview {
    pub message_id: MessageId,
    pub sender_name: String,
    pub excerpt: String,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Canonical server id once confirmed, `local-` id before that.
    pub id: MessageId,
    pub conversation_id: String,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: String,
    /// Optional rich rendering payload (mentions, formatting) passed through
    /// untouched for the UI layer.
    pub rich_body: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    /// Server-assigned ordering sequence, used to break timestamp ties.
    pub server_seq: Option<u64>,
    pub edited: bool,
    /// Monotonic edit counter for optimistic-concurrency conflict detection.
    pub version: u32,
    pub reply_to: Option<ReplyPreview>,
    pub attachments: Vec<Attachment>,
    pub send_state: SendState,
}

impl Message {
    /// True while the entry is an optimistic local one (sending or failed).
    pub fn is_pending(&self) -> bool {
        self.send_state != SendState::Confirmed
    }

    /// Short plain-text excerpt for reply previews and list rows.
    pub fn excerpt(&self, max_chars: usize) -> String {
        if self.body.is_empty()
            && let Some(att) = self.attachments.first()
        {
            return att.name.clone();
        }
        if self.body.chars().count() <= max_chars {
            self.body.clone()
        } else {
            let cut: String = self.body.chars().take(max_chars).collect();
            format!("{cut}…")
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            conversation_id: "conv-1".to_string(),
            sender_id: "user-1".to_string(),
            sender_name: "Test User".to_string(),
            body: "hello".to_string(),
            rich_body: None,
            created_at: Utc::now(),
            server_seq: None,
            edited: false,
            version: 1,
            reply_to: None,
            attachments: Vec::new(),
            send_state: SendState::Confirmed,
        }
    }

    #[test]
    fn test_local_ids_carry_the_local_namespace() {
        let id = new_local_id();
        assert!(is_local_id(&id));
        assert!(!is_local_id("msg-8271"));
    }

    #[test]
    fn test_local_ids_are_unique() {
        let a = new_local_id();
        let b = new_local_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let mut msg = test_message("m1");
        msg.body = "a".repeat(100);
        let excerpt = msg.excerpt(40);
        assert_eq!(excerpt.chars().count(), 41); // 40 chars + ellipsis
        assert!(excerpt.ends_with('…'));
    }

    #[test]
    fn test_excerpt_falls_back_to_attachment_name() {
        let mut msg = test_message("m1");
        msg.body = String::new();
        msg.attachments.push(Attachment {
            id: "att-1".into(),
            name: "site-photo.jpg".into(),
            url: "https://cdn.example/att-1".into(),
            kind: AttachmentKind::Image,
            size_bytes: 1024,
            status: AttachmentStatus::Ready,
        });
        assert_eq!(msg.excerpt(40), "site-photo.jpg");
    }
}
