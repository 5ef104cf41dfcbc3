//! Conversation registry: the list backing the inbox view.
//!
//! A thin filter/aggregate layer over per-conversation summaries. Message
//! bodies live in the sync engine; this only maintains denormalized preview
//! fields, archive state and unread aggregates.

use std::sync::Mutex;

use dashmap::DashMap;
use log::debug;

use crate::types::conversation::{
    Conversation, ConversationFilter, ConversationId, ConversationStatus,
};
use crate::types::message::{Message, UserId};

/// Aggregate unread counters across the active (non-archived) set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnreadTotals {
    pub total_unread: u32,
    pub total_unread_mentions: u32,
}

pub struct ConversationRegistry {
    viewer: UserId,
    conversations: DashMap<ConversationId, Conversation>,
    search_query: Mutex<String>,
}

impl ConversationRegistry {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            conversations: DashMap::new(),
            search_query: Mutex::new(String::new()),
        }
    }

    /// Insert or replace a conversation summary from the backend.
    pub fn upsert(&self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.conversations.get(id).map(|c| c.clone())
    }

    /// Set the active search query; empty clears it.
    pub fn apply_search(&self, query: &str) {
        *self.search_query.lock().expect("search query lock") = query.to_string();
    }

    /// Conversations passing the type filter, status and current search,
    /// newest activity first.
    pub fn list(&self, filter: ConversationFilter, status: ConversationStatus) -> Vec<Conversation> {
        let query = self.search_query.lock().expect("search query lock").clone();
        let mut rows: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|c| c.status == status)
            .filter(|c| c.matches_filter(filter, &self.viewer))
            .filter(|c| c.matches_search(&query))
            .map(|c| c.clone())
            .collect();
        rows.sort_by(|a, b| {
            b.last_message_at
                .cmp(&a.last_message_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }

    /// Archive a conversation; the terminal state reachable from the UI.
    pub fn archive(&self, id: &str) -> bool {
        self.set_status(id, ConversationStatus::Archived)
    }

    pub fn unarchive(&self, id: &str) -> bool {
        self.set_status(id, ConversationStatus::Active)
    }

    fn set_status(&self, id: &str, status: ConversationStatus) -> bool {
        match self.conversations.get_mut(id) {
            Some(mut conv) => {
                conv.status = status;
                debug!(target: "Registry", "conversation {id} -> {status:?}");
                true
            }
            None => false,
        }
    }

    /// Fold a sent or received message into the owning conversation's
    /// preview fields. Unread counters bump only when the conversation is
    /// not the one being viewed and the viewer is not the author.
    pub fn note_message(&self, message: &Message, is_viewing: bool) {
        let Some(mut conv) = self.conversations.get_mut(&message.conversation_id) else {
            return;
        };
        let is_newer = conv
            .last_message_at
            .is_none_or(|at| message.created_at >= at);
        if !is_newer {
            return;
        }
        conv.last_message_preview = Some(message.excerpt(80));
        conv.last_message_sender = Some(message.sender_name.clone());
        conv.last_message_at = Some(message.created_at);

        if !is_viewing && message.sender_id != self.viewer {
            conv.unread_count += 1;
            if mentions_viewer(message, &self.viewer) {
                conv.unread_mention_count += 1;
            }
        }
    }

    /// The viewer opened a conversation; its unread counters reset.
    pub fn mark_viewed(&self, id: &str) {
        if let Some(mut conv) = self.conversations.get_mut(id) {
            conv.unread_count = 0;
            conv.unread_mention_count = 0;
        }
    }

    /// Aggregate unread counters over the active set; archived
    /// conversations are excluded.
    pub fn totals(&self) -> UnreadTotals {
        let mut totals = UnreadTotals::default();
        for conv in self.conversations.iter() {
            if conv.status != ConversationStatus::Active {
                continue;
            }
            totals.total_unread += conv.unread_count;
            totals.total_unread_mentions += conv.unread_mention_count;
        }
        totals
    }
}

/// Whether a message's rich payload mentions the viewer: a `mentions` array
/// of user ids, as emitted by the composer.
fn mentions_viewer(message: &Message, viewer: &UserId) -> bool {
    message
        .rich_body
        .as_ref()
        .and_then(|body| body.get("mentions"))
        .and_then(|m| m.as_array())
        .is_some_and(|ids| ids.iter().any(|id| id.as_str() == Some(viewer.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::conversation::ConversationKind;
    use crate::types::conversation::tests::test_conversation;
    use crate::types::message::tests::test_message;
    use chrono::Utc;

    fn registry() -> ConversationRegistry {
        ConversationRegistry::new("viewer-1".to_string())
    }

    #[test]
    fn test_unread_totals_exclude_archived() {
        let registry = registry();
        for (id, unread, archived) in [
            ("c1", 2, false),
            ("c2", 0, false),
            ("c3", 5, false),
            ("c4", 9, true),
        ] {
            let mut conv = test_conversation(id, ConversationKind::TeamChat);
            conv.unread_count = unread;
            if archived {
                conv.status = ConversationStatus::Archived;
            }
            registry.upsert(conv);
        }
        assert_eq!(registry.totals().total_unread, 7);
    }

    #[test]
    fn test_search_scenarios() {
        let registry = registry();
        let mut job = test_conversation("c1", ConversationKind::JobDiscussion);
        job.title = Some("Kitchen Remodel".to_string());
        job.job_title = Some("Kitchen Remodel".to_string());
        registry.upsert(job);

        let mut customer = test_conversation("c2", ConversationKind::CustomerThread);
        customer.counterpart_name = Some("Jane Doe".to_string());
        registry.upsert(customer);

        registry.apply_search("kitchen");
        let rows = registry.list(ConversationFilter::All, ConversationStatus::Active);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "c1");

        registry.apply_search("jane");
        let rows = registry.list(ConversationFilter::All, ConversationStatus::Active);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "c2");
    }

    #[test]
    fn test_archive_roundtrip() {
        let registry = registry();
        registry.upsert(test_conversation("c1", ConversationKind::Direct));
        assert!(registry.archive("c1"));
        assert!(
            registry
                .list(ConversationFilter::All, ConversationStatus::Active)
                .is_empty()
        );
        assert_eq!(
            registry
                .list(ConversationFilter::All, ConversationStatus::Archived)
                .len(),
            1
        );
        assert!(registry.unarchive("c1"));
        assert!(!registry.archive("missing"));
    }

    #[test]
    fn test_note_message_updates_preview_and_unread() {
        let registry = registry();
        registry.upsert(test_conversation("conv-1", ConversationKind::TeamChat));

        let msg = test_message("srv-1"); // sender user-1, body "hello"
        registry.note_message(&msg, false);

        let conv = registry.get("conv-1").unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("hello"));
        assert_eq!(conv.last_message_sender.as_deref(), Some("Test User"));
        assert_eq!(conv.unread_count, 1);

        registry.mark_viewed("conv-1");
        assert_eq!(registry.get("conv-1").unwrap().unread_count, 0);
    }

    #[test]
    fn test_viewing_or_own_messages_do_not_bump_unread() {
        let registry = registry();
        registry.upsert(test_conversation("conv-1", ConversationKind::TeamChat));

        let msg = test_message("srv-1");
        registry.note_message(&msg, true);
        assert_eq!(registry.get("conv-1").unwrap().unread_count, 0);

        let mut own = test_message("srv-2");
        own.sender_id = "viewer-1".to_string();
        own.created_at = Utc::now();
        registry.note_message(&own, false);
        assert_eq!(registry.get("conv-1").unwrap().unread_count, 0);
    }

    #[test]
    fn test_mentions_bump_mention_counter() {
        let registry = registry();
        registry.upsert(test_conversation("conv-1", ConversationKind::TeamChat));

        let mut msg = test_message("srv-1");
        msg.rich_body = Some(serde_json::json!({ "mentions": ["viewer-1"] }));
        registry.note_message(&msg, false);

        let conv = registry.get("conv-1").unwrap();
        assert_eq!(conv.unread_count, 1);
        assert_eq!(conv.unread_mention_count, 1);
    }

    #[test]
    fn test_older_message_does_not_overwrite_preview() {
        let registry = registry();
        registry.upsert(test_conversation("conv-1", ConversationKind::TeamChat));

        let newer = test_message("srv-2");
        registry.note_message(&newer, true);

        let mut older = test_message("srv-1");
        older.body = "stale history".to_string();
        older.created_at = newer.created_at - chrono::Duration::hours(1);
        registry.note_message(&older, true);

        let conv = registry.get("conv-1").unwrap();
        assert_eq!(conv.last_message_preview.as_deref(), Some("hello"));
    }
}
