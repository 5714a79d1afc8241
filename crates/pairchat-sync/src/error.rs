use std::time::Duration;

use thiserror::Error;

use pairchat_shared::{ChatId, SessionError, TimestampError, UserId};
use pairchat_store::StoreError;

/// Failures reported by a [`RemoteSyncSource`](crate::remote::RemoteSyncSource).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network down or backend unreachable.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already used: {0}")]
    SessionAlreadyUsed(String),

    #[error("Cannot join a session you created")]
    SelfJoin,

    #[error("Chat not found: {0}")]
    ChatNotFound(ChatId),

    #[error("User {user} is not a participant of chat {chat}")]
    NotParticipant { chat: ChatId, user: UserId },

    /// The backend refused the write for a reason retrying will not fix.
    #[error("Remote rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unavailable(_) | RemoteError::Timeout(_))
    }
}

/// Errors produced by the sync layer.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Message content is empty")]
    EmptyContent,

    #[error("Message content too long: {len} characters (max {max})")]
    ContentTooLong { len: usize, max: usize },

    #[error("Unknown chat: {0}")]
    UnknownChat(ChatId),

    #[error("Chat is no longer active: {0}")]
    ChatInactive(ChatId),

    #[error("User {user} is not a participant of chat {chat}")]
    NotParticipant { chat: ChatId, user: UserId },

    /// A remote record could not be mapped onto the local model.
    #[error("Invalid remote record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
