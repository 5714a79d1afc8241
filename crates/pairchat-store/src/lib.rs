//! # pairchat-store
//!
//! Local cache for the pairchat sync layer, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for chats,
//! messages and the pending-operation (sync) queue. Every multi-row write is
//! transactional, so a failed operation never leaves partially applied rows.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod sync_queue;

mod error;
mod rows;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};
    use pairchat_shared::{ChatId, MessageId, UserId};

    use crate::models::{Chat, Message, MessageStatus, MessageType};

    pub fn ts(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    /// Active chat between `u1` (Alice) and `u2` (Bob) created at `created`.
    pub fn chat(id: &str, created: i64) -> Chat {
        let mut names = BTreeMap::new();
        names.insert(UserId::from("u1"), "Alice".to_string());
        names.insert(UserId::from("u2"), "Bob".to_string());
        Chat {
            id: ChatId::from(id),
            participants: vec!["u1".into(), "u2".into()],
            participant_names: names,
            created_at: ts(created),
            updated_at: ts(created),
            last_message: None,
            is_active: true,
        }
    }

    pub fn message_at(
        chat: &str,
        id: &str,
        sender: &str,
        millis: i64,
        status: MessageStatus,
    ) -> Message {
        Message {
            id: MessageId::from(id),
            chat_id: ChatId::from(chat),
            sender_id: UserId::from(sender),
            sender_name: sender.to_uppercase(),
            content: format!("message {id}"),
            timestamp: ts(millis),
            message_type: MessageType::Text,
            status,
        }
    }
}
