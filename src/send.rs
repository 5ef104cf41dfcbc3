//! Optimistic send pipeline.
//!
//! State machine per outgoing message: composing -> sending -> confirmed or
//! failed. The temp entry is inserted into the sync engine immediately and
//! either reconciled in place on confirmation or flagged for manual retry.
//! The async transport round-trip is driven by the conversation handle; this
//! module owns the bookkeeping and the permission policy.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use log::debug;

use crate::error::ChatError;
use crate::transport::OutgoingMessage;
use crate::types::conversation::ConversationId;
use crate::types::message::{
    Attachment, Message, MessageId, ReplyPreview, SendState, UserId, new_local_id,
};

/// Characters kept when snapshotting a reply target's body.
const REPLY_EXCERPT_CHARS: usize = 80;

/// Tracks which temporary ids have a transmission attempt in flight, so
/// concurrent retries coalesce into one attempt.
#[derive(Default)]
pub struct SendQueue {
    in_flight: HashSet<MessageId>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an in-flight slot for a temp id. Returns false when an attempt
    /// is already running, in which case the caller must back off.
    pub fn begin(&mut self, temp_id: &str) -> bool {
        let claimed = self.in_flight.insert(temp_id.to_string());
        if !claimed {
            debug!(target: "SendQueue", "attempt for {temp_id} already in flight, coalescing");
        }
        claimed
    }

    /// Release the slot once the attempt resolved either way.
    pub fn finish(&mut self, temp_id: &str) {
        self.in_flight.remove(temp_id);
    }

    pub fn is_in_flight(&self, temp_id: &str) -> bool {
        self.in_flight.contains(temp_id)
    }
}

/// Validate outgoing content. An empty body with no attachments is rejected
/// before any network call.
pub fn build_outgoing(
    body: String,
    rich_body: Option<serde_json::Value>,
    attachments: Vec<Attachment>,
    reply_to: Option<ReplyPreview>,
) -> Result<OutgoingMessage, ChatError> {
    if body.trim().is_empty() && attachments.is_empty() {
        return Err(ChatError::Validation("message body is empty"));
    }
    Ok(OutgoingMessage {
        body,
        rich_body,
        attachments,
        reply_to,
    })
}

/// Snapshot a reply target into the denormalized preview an outgoing
/// message carries.
pub fn reply_preview_for(target: &Message) -> ReplyPreview {
    ReplyPreview {
        message_id: target.id.clone(),
        sender_name: target.sender_name.clone(),
        excerpt: target.excerpt(REPLY_EXCERPT_CHARS),
    }
}

/// Build the locally-visible temp entry for an outgoing message: `local-`
/// id, the sender's current time, `Sending` state.
pub fn make_local_message(
    conversation_id: &ConversationId,
    sender_id: &UserId,
    sender_name: &str,
    outgoing: &OutgoingMessage,
) -> Message {
    Message {
        id: new_local_id(),
        conversation_id: conversation_id.clone(),
        sender_id: sender_id.clone(),
        sender_name: sender_name.to_string(),
        body: outgoing.body.clone(),
        rich_body: outgoing.rich_body.clone(),
        created_at: Utc::now(),
        server_seq: None,
        edited: false,
        version: 1,
        reply_to: outgoing.reply_to.clone(),
        attachments: outgoing.attachments.clone(),
        send_state: SendState::Sending,
    }
}

/// Rebuild the outgoing payload from a failed entry, so a retry transmits
/// the exact same content.
pub fn outgoing_from_message(message: &Message) -> OutgoingMessage {
    OutgoingMessage {
        body: message.body.clone(),
        rich_body: message.rich_body.clone(),
        attachments: message.attachments.clone(),
        reply_to: message.reply_to.clone(),
    }
}

/// Edit permission: confirmed messages only; the author within the edit
/// window, or an elevated role regardless of age.
pub fn can_edit(message: &Message, viewer: &UserId, elevated: bool, edit_window: Duration) -> bool {
    if message.send_state != SendState::Confirmed {
        return false;
    }
    if elevated {
        return true;
    }
    if message.sender_id != *viewer {
        return false;
    }
    let age = Utc::now().signed_duration_since(message.created_at);
    age <= chrono::Duration::from_std(edit_window).unwrap_or_else(|_| chrono::Duration::zero())
}

/// Delete permission: the author or an elevated role, regardless of age.
pub fn can_delete(message: &Message, viewer: &UserId, elevated: bool) -> bool {
    elevated || message.sender_id == *viewer
}
