use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::UserId;

pub type ConversationId = String;

/// Fallback title when nothing better can be derived.
pub const UNTITLED_CONVERSATION: &str = "Untitled Conversation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    CustomerThread,
    TeamChat,
    JobDiscussion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

/// Type filter for the conversation list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationFilter {
    All,
    /// Direct conversations the viewer participates in.
    MyDirect,
    Customer,
    Team,
    Job,
}

/// A conversation summary row. Message bodies live in the sync engine; this
/// carries only the denormalized fields the list view needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    /// Explicit title, if one was set. Display title is derived otherwise.
    pub title: Option<String>,
    pub status: ConversationStatus,
    /// Assignee, meaningful only for customer threads.
    pub assigned_to: Option<UserId>,
    /// Counterpart person's name (the customer on a customer thread, the
    /// other participant on a direct conversation).
    pub counterpart_name: Option<String>,
    /// Title of the linked job, for job discussions.
    pub job_title: Option<String>,
    pub participants: Vec<UserId>,
    pub last_message_preview: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    /// Per-viewer unread counters, as reported by the backend.
    pub unread_count: u32,
    pub unread_mention_count: u32,
}

impl Conversation {
    /// Title resolution: explicit title, else counterpart name, else linked
    /// job title, else a literal fallback.
    pub fn display_title(&self) -> &str {
        if let Some(title) = &self.title
            && !title.is_empty()
        {
            return title;
        }
        if let Some(name) = &self.counterpart_name
            && !name.is_empty()
        {
            return name;
        }
        if let Some(job) = &self.job_title
            && !job.is_empty()
        {
            return job;
        }
        UNTITLED_CONVERSATION
    }

    /// Whether this conversation passes a type filter for the given viewer.
    pub fn matches_filter(&self, filter: ConversationFilter, viewer: &UserId) -> bool {
        match filter {
            ConversationFilter::All => true,
            ConversationFilter::MyDirect => {
                self.kind == ConversationKind::Direct && self.participants.contains(viewer)
            }
            ConversationFilter::Customer => self.kind == ConversationKind::CustomerThread,
            ConversationFilter::Team => self.kind == ConversationKind::TeamChat,
            ConversationFilter::Job => self.kind == ConversationKind::JobDiscussion,
        }
    }

    /// Case-insensitive search over title, counterpart name, job title and
    /// the last-message preview. Any hit includes the conversation.
    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        let hit = |field: Option<&String>| {
            field.is_some_and(|text| text.to_lowercase().contains(&query))
        };
        hit(self.title.as_ref())
            || hit(self.counterpart_name.as_ref())
            || hit(self.job_title.as_ref())
            || hit(self.last_message_preview.as_ref())
    }
}
