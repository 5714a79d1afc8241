//! The seam to the remote real-time store.
//!
//! Subscriptions hand back a channel of full snapshots. The stream ends when
//! the backend drops its sender; the receiving side then resubscribes.
//! Dropping the receiver is how a caller unsubscribes.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use pairchat_shared::protocol::{RemoteChat, RemoteMessage};
use pairchat_shared::session::SessionJoinPayload;
use pairchat_shared::{ChatId, LocalUser, UserId};

use crate::error::RemoteError;

/// Ordered full-state snapshots, or delivery errors, from one subscription.
pub type SnapshotStream<T> = mpsc::Receiver<Result<Vec<T>, RemoteError>>;

#[async_trait]
pub trait RemoteSyncSource: Send + Sync + 'static {
    /// Every active chat `user_id` participates in.
    async fn subscribe_to_user_chats(
        &self,
        user_id: &UserId,
    ) -> Result<SnapshotStream<RemoteChat>, RemoteError>;

    /// Every message of `chat_id`.
    async fn subscribe_to_messages(
        &self,
        chat_id: &ChatId,
    ) -> Result<SnapshotStream<RemoteMessage>, RemoteError>;

    /// Write a message. Writing the same id twice must be harmless.
    async fn send_message(&self, message: &RemoteMessage) -> Result<(), RemoteError>;

    /// Register a session that a second user can join.
    async fn create_session(&self, session_id: &str, creator: &LocalUser)
        -> Result<(), RemoteError>;

    /// Join a session and create the two-party chat.
    async fn join_session(
        &self,
        payload: &SessionJoinPayload,
        user: &LocalUser,
    ) -> Result<RemoteChat, RemoteError>;

    /// Mark a chat inactive for both parties.
    async fn leave_chat(&self, chat_id: &ChatId, user_id: &UserId) -> Result<(), RemoteError>;
}

/// Bound a remote call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, RemoteError>(())
        };
        let err = with_timeout(Duration::from_secs(10), slow).await.unwrap_err();
        assert_eq!(err, RemoteError::Timeout(Duration::from_secs(10)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let fast = async { Err::<(), _>(RemoteError::SelfJoin) };
        let err = with_timeout(Duration::from_secs(1), fast).await.unwrap_err();
        assert_eq!(err, RemoteError::SelfJoin);
        assert!(!err.is_transient());
    }
}
