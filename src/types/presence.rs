use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{MessageId, UserId};

/// Outgoing typing broadcast decided by the tracker's debounce logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingSignal {
    Started,
    Stopped,
}

/// One remote user currently typing in a conversation. Ephemeral, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Typist {
    pub user_id: UserId,
    pub name: String,
    /// When the most recent signal from this user was received.
    pub last_signal_at: DateTime<Utc>,
}

/// A record that a specific user has viewed a specific message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: MessageId,
    pub reader_id: UserId,
    pub read_at: DateTime<Utc>,
}
