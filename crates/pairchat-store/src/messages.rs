use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use pairchat_shared::timestamp::{self, to_storage_string};
use pairchat_shared::{ChatId, MessageId, UserId};

use crate::chats::{chat_exists, refresh_chat_summary};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageStatus};
use crate::rows::{get_parsed, get_timestamp};

const MESSAGE_COLUMNS: &str =
    "id, chat_id, sender_id, sender_name, content, timestamp, type, status";

impl Database {
    /// Insert or replace a message by id and refresh its chat summary.
    pub fn save_message(&self, message: &Message) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        upsert_message(&tx, message)?;
        refresh_chat_summary(&tx, &message.chat_id)?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a batch of messages atomically.
    ///
    /// Either every message is stored (and every touched chat refreshed) or
    /// nothing is.
    pub fn save_messages(&self, messages: &[Message]) -> Result<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let tx = self.conn().unchecked_transaction()?;
        let mut touched = BTreeSet::new();
        for message in messages {
            upsert_message(&tx, message)?;
            touched.insert(&message.chat_id);
        }
        for chat_id in touched {
            refresh_chat_summary(&tx, chat_id)?;
        }
        tx.commit()?;

        tracing::debug!(count = messages.len(), "messages saved");
        Ok(messages.len())
    }

    /// All messages of a chat in ascending timestamp order (ties by id).
    pub fn get_messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![chat_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    pub fn get_message(&self, id: &MessageId) -> Result<Message> {
        self.find_message(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        fetch_message(self.conn(), id)
    }

    /// Move a message along the delivery state machine.
    pub fn update_message_status(&self, id: &MessageId, status: MessageStatus) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        set_status_checked(&tx, id, status)?;
        tx.commit()?;
        Ok(())
    }

    /// Timestamp of the newest cached message of a chat.
    pub fn latest_message_timestamp(&self, chat_id: &ChatId) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = self.conn().query_row(
            "SELECT MAX(timestamp) FROM messages WHERE chat_id = ?1",
            params![chat_id.as_str()],
            |row| row.get(0),
        )?;
        Ok(raw.map(|s| timestamp::parse_iso(&s)).transpose()?)
    }

    /// Mark every incoming message of a chat as read by `reader`.
    ///
    /// Returns the number of messages that changed.
    pub fn mark_chat_read(&self, chat_id: &ChatId, reader: &UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'read'
             WHERE chat_id = ?1
               AND sender_id != ?2
               AND status IN ('sent', 'delivered')",
            params![chat_id.as_str(), reader.as_str()],
        )?;
        if affected > 0 {
            tracing::debug!(chat = %chat_id, affected, "messages marked read");
        }
        Ok(affected)
    }
}

// ----------------------------------------------------------------------
// Connection-level helpers
// ----------------------------------------------------------------------

pub(crate) fn upsert_message(conn: &Connection, message: &Message) -> Result<()> {
    if !chat_exists(conn, &message.chat_id)? {
        return Err(StoreError::UnknownChat(message.chat_id.clone()));
    }

    conn.execute(
        "INSERT INTO messages (id, chat_id, sender_id, sender_name, content, timestamp, type, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
            chat_id     = excluded.chat_id,
            sender_id   = excluded.sender_id,
            sender_name = excluded.sender_name,
            content     = excluded.content,
            timestamp   = excluded.timestamp,
            type        = excluded.type,
            status      = excluded.status",
        params![
            message.id.as_str(),
            message.chat_id.as_str(),
            message.sender_id.as_str(),
            message.sender_name,
            message.content,
            to_storage_string(&message.timestamp),
            message.message_type.as_str(),
            message.status.as_str(),
        ],
    )?;
    Ok(())
}

pub(crate) fn fetch_message(conn: &Connection, id: &MessageId) -> Result<Option<Message>> {
    Ok(conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            params![id.as_str()],
            row_to_message,
        )
        .optional()?)
}

/// Validate and apply a status change.
pub(crate) fn set_status_checked(
    conn: &Connection,
    id: &MessageId,
    status: MessageStatus,
) -> Result<()> {
    let current = fetch_message(conn, id)?
        .ok_or(StoreError::NotFound)?
        .status;
    if !current.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            from: current,
            to: status,
        });
    }
    if current != status {
        conn.execute(
            "UPDATE messages SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.as_str()],
        )?;
        tracing::debug!(message = %id, from = %current, to = %status, "message status changed");
    }
    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        sender_name: row.get(3)?,
        content: row.get(4)?,
        timestamp: get_timestamp(row, 5)?,
        message_type: get_parsed(row, 6)?,
        status: get_parsed(row, 7)?,
    })
}
