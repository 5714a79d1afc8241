//! Command handlers invoked by the UI layer.
//!
//! Each sub-module groups related commands by domain. Handlers take the
//! shared [`AppState`](crate::state::AppState) plus plain string arguments
//! and return camelCase DTOs ready to serialize.

pub mod chats;
pub mod messaging;
pub mod session;

use pairchat_shared::ChatId;

use crate::error::{ClientError, Result};

/// Validate a chat id passed in from the UI.
pub(crate) fn parse_chat_id(raw: &str) -> Result<ChatId> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ClientError::InvalidArgument("chat id is empty".into()));
    }
    Ok(ChatId::from(raw))
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Duration;

    use pairchat_shared::LocalUser;
    use pairchat_sync::MemoryRemote;

    use super::*;
    use crate::config::{ClientConfig, DatabaseLocation};
    use crate::state::{AppState, Connectivity};

    async fn start(remote: &MemoryRemote, id: &str, name: &str) -> AppState {
        let config = ClientConfig {
            database: DatabaseLocation::InMemory,
            user: LocalUser::new(id, name),
            ..ClientConfig::default()
        };
        let (state, _events) =
            AppState::start(config, Arc::new(remote.clone()), Connectivity::manual(true))
                .await
                .unwrap();
        state
    }

    /// Poll `check` until it returns true.
    async fn eventually<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        for _ in 0..500 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_parse_chat_id_rejects_blank() {
        assert!(matches!(
            parse_chat_id("  "),
            Err(ClientError::InvalidArgument(_))
        ));
        assert_eq!(parse_chat_id(" c1 ").unwrap(), ChatId::from("c1"));
    }

    #[tokio::test]
    async fn test_pair_and_message_through_commands() {
        let remote = MemoryRemote::new();
        let alice = start(&remote, "u1", "Alice").await;
        let bob = start(&remote, "u2", "Bob").await;

        let session = session::create_session(&alice).await.unwrap();
        let chat = session::join_session(&bob, session.qr_payload.clone())
            .await
            .unwrap();
        assert_eq!(chat.title, "Alice");

        let a = &alice;
        eventually(|| async move { chats::list_chats(a).await.unwrap().len() == 1 }).await;
        let listed = chats::list_chats(&alice).await.unwrap();
        assert_eq!(listed[0].title, "Bob");

        let opened = messaging::open_chat(&alice, chat.id.clone()).await.unwrap();
        assert!(opened.is_empty());

        let sent = messaging::send_message(&bob, chat.id.clone(), "  hello  ".into())
            .await
            .unwrap();
        assert_eq!(sent.content, "hello");
        assert!(sent.from_me);

        eventually(|| {
            let id = chat.id.clone();
            async move {
                let messages = messaging::get_messages(a, id).await.unwrap();
                messages.len() == 1 && messages[0].status == "read"
            }
        })
        .await;
        let received = messaging::get_messages(&alice, chat.id.clone()).await.unwrap();
        assert_eq!(received[0].sender_name, "Bob");
        assert!(!received[0].from_me);
        assert_eq!(received[0].status, "read");

        messaging::close_chat(&alice).await.unwrap();
        alice.shutdown().await.unwrap();
        bob.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_blocking_errors_from_commands() {
        let remote = MemoryRemote::new();
        let alice = start(&remote, "u1", "Alice").await;

        let err = session::join_session(&alice, "no-such-session".into())
            .await
            .unwrap_err();
        assert!(err.is_blocking());

        let err = messaging::send_message(&alice, "missing".into(), "hi".into())
            .await
            .unwrap_err();
        assert!(!err.is_blocking());

        let report = messaging::retry_pending(&alice).await.unwrap();
        assert_eq!(report.remaining, 0);
        alice.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_leave_chat_command() {
        let remote = MemoryRemote::new();
        let alice = start(&remote, "u1", "Alice").await;
        let bob = start(&remote, "u2", "Bob").await;

        let session = session::create_session(&alice).await.unwrap();
        let chat = session::join_session(&bob, session.session_id).await.unwrap();

        chats::leave_chat(&bob, chat.id.clone()).await.unwrap();
        assert!(chats::list_chats(&bob).await.unwrap().is_empty());
        let a = &alice;
        eventually(|| async move { chats::list_chats(a).await.unwrap().is_empty() }).await;
    }
}
