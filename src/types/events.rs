//! Typed event bus notifying the embedding UI of state changes.
//!
//! One broadcast channel per event kind; subscribers pick the channels they
//! care about and lagging subscribers only lose their own backlog.

use std::sync::Arc;
use tokio::sync::broadcast;

use super::conversation::ConversationId;
use super::message::{Message, MessageId};
use super::presence::Typist;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Reason a message list changed, so the UI can decide whether to animate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    /// A page of history was merged in.
    PageLoaded,
    /// A live or locally-created message was inserted.
    Inserted,
    /// An existing entry changed in place (edit, state transition).
    Updated,
    /// An entry was removed.
    Removed,
    /// The reconciliation of an optimistic entry moved it in the order.
    Reordered,
}

#[derive(Debug, Clone)]
pub struct MessageListChanged {
    pub conversation_id: ConversationId,
    pub change: ListChange,
}

#[derive(Debug, Clone)]
pub struct SendFailed {
    pub conversation_id: ConversationId,
    pub temp_id: MessageId,
}

#[derive(Debug, Clone)]
pub struct TypingChanged {
    pub conversation_id: ConversationId,
    pub typers: Vec<Typist>,
}

#[derive(Debug, Clone)]
pub struct ReceiptsChanged {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

#[derive(Debug, Clone)]
pub struct UnreadChanged {
    pub total_unread: u32,
    pub total_unread_mentions: u32,
}

#[derive(Debug, Clone)]
pub struct MessageConfirmed {
    pub conversation_id: ConversationId,
    pub temp_id: MessageId,
    pub message: Box<Message>,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for
        /// each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (message_list_changed, Arc<MessageListChanged>),
    (message_confirmed, Arc<MessageConfirmed>),
    (send_failed, Arc<SendFailed>),
    (typing_changed, Arc<TypingChanged>),
    (receipts_changed, Arc<ReceiptsChanged>),
    (unread_changed, Arc<UnreadChanged>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
