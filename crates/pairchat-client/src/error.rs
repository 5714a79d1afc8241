use serde::{Serialize, Serializer};
use thiserror::Error;

use pairchat_store::StoreError;
use pairchat_sync::{RemoteError, SyncError};

/// Errors returned by client commands.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ClientError {
    /// Errors the user has to act on (show a dialog) rather than ones that
    /// heal by themselves through retries.
    pub fn is_blocking(&self) -> bool {
        match self {
            ClientError::Sync(SyncError::Remote(e)) => is_blocking_remote(e),
            ClientError::Sync(SyncError::Session(_))
            | ClientError::Sync(SyncError::NotParticipant { .. })
            | ClientError::Sync(SyncError::ChatInactive(_)) => true,
            _ => false,
        }
    }
}

pub(crate) fn is_blocking_remote(error: &RemoteError) -> bool {
    matches!(
        error,
        RemoteError::SessionNotFound(_)
            | RemoteError::SessionAlreadyUsed(_)
            | RemoteError::SelfJoin
            | RemoteError::NotParticipant { .. }
            | RemoteError::ChatNotFound(_)
    )
}

// UI layers receive command errors as plain messages.
impl Serialize for ClientError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::SessionError;
    use std::time::Duration;

    #[test]
    fn test_session_failures_are_blocking() {
        let not_found = ClientError::from(SyncError::from(RemoteError::SessionNotFound(
            "abc".into(),
        )));
        assert!(not_found.is_blocking());
        assert!(ClientError::from(SyncError::from(RemoteError::SelfJoin)).is_blocking());
        assert!(ClientError::from(SyncError::from(SessionError::Empty)).is_blocking());
    }

    #[test]
    fn test_transient_failures_are_not_blocking() {
        let timeout = ClientError::from(SyncError::from(RemoteError::Timeout(
            Duration::from_secs(10),
        )));
        assert!(!timeout.is_blocking());
        assert!(!ClientError::from(SyncError::EmptyContent).is_blocking());
        assert!(!ClientError::InvalidArgument("x".into()).is_blocking());
    }

    #[test]
    fn test_serializes_as_message() {
        let json = serde_json::to_string(&ClientError::InvalidArgument("bad id".into())).unwrap();
        assert_eq!(json, "\"Invalid argument: bad id\"");
    }
}
