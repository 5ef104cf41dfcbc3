use thiserror::Error;

use crate::types::message::MessageId;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Network or remote failure. Sends are retried manually by the user;
    /// page loads surface this to the caller with state untouched.
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Edit version mismatch. The caller must refetch before retrying.
    #[error("stale edit: expected version {expected}, stored version is {actual}")]
    Conflict { expected: u32, actual: u32 },

    /// Rejected before any network call.
    #[error("validation failed: {0}")]
    Validation(&'static str),

    /// Response for a conversation that is no longer active. Silently
    /// discarded by the orchestration layer, never surfaced to the user.
    #[error("stale request: conversation no longer active")]
    StaleRequest,

    #[error("not permitted: {0}")]
    NotPermitted(&'static str),

    #[error("unknown message: {0}")]
    UnknownMessage(MessageId),
}

impl ChatError {
    /// Stale responses are expected during navigation and must not reach
    /// the user.
    pub fn is_stale(&self) -> bool {
        matches!(self, ChatError::StaleRequest)
    }
}
