//! CRUD operations for [`Chat`] records.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};

use pairchat_shared::timestamp::to_storage_string;
use pairchat_shared::ChatId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Chat, LastMessage};
use crate::rows::{get_json, get_opt_timestamp, get_timestamp};

const CHAT_COLUMNS: &str = "id, participants_json, participant_names_json,
     last_message_content, last_message_timestamp, last_message_sender_id,
     created_at, updated_at, is_active";

impl Database {
    // ------------------------------------------------------------------
    // Create / update
    // ------------------------------------------------------------------

    /// Insert or replace a chat by id and return the row as stored.
    ///
    /// The stored `last_message` is the newer of the supplied summary and the
    /// newest cached message, and `updated_at` is clamped so it never falls
    /// behind either `created_at` or that message.
    pub fn save_chat(&self, chat: &Chat) -> Result<Chat> {
        let tx = self.conn().unchecked_transaction()?;
        upsert_chat(&tx, chat)?;
        refresh_chat_summary(&tx, &chat.id)?;
        let stored = fetch_chat(&tx, &chat.id)?.ok_or(StoreError::NotFound)?;
        tx.commit()?;

        tracing::debug!(chat = %chat.id, active = stored.is_active, "chat saved");
        Ok(stored)
    }

    /// Mark a chat inactive. Returns `false` when no such chat exists.
    pub fn deactivate_chat(&self, id: &ChatId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE chats SET is_active = 0 WHERE id = ?1",
            params![id.as_str()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single chat (active or not).
    pub fn get_chat(&self, id: &ChatId) -> Result<Chat> {
        self.find_chat(id)?.ok_or(StoreError::NotFound)
    }

    /// Like [`Database::get_chat`] but returns `None` for a missing row.
    pub fn find_chat(&self, id: &ChatId) -> Result<Option<Chat>> {
        fetch_chat(self.conn(), id)
    }

    /// All active chats, most recently updated first.
    pub fn get_all_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats
             WHERE is_active = 1
             ORDER BY updated_at DESC, created_at DESC, id ASC"
        ))?;

        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Ids of every active chat.
    pub fn active_chat_ids(&self) -> Result<HashSet<ChatId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM chats WHERE is_active = 1")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(ChatId(row?));
        }
        Ok(ids)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Remove a chat, its messages and any queued writes for those messages.
    ///
    /// Returns `false` when the chat did not exist.
    pub fn delete_chat(&self, id: &ChatId) -> Result<bool> {
        let tx = self.conn().unchecked_transaction()?;

        let queued = tx.execute(
            "DELETE FROM sync_queue
             WHERE table_name = 'messages'
               AND record_id IN (SELECT id FROM messages WHERE chat_id = ?1)",
            params![id.as_str()],
        )?;
        let messages = tx.execute(
            "DELETE FROM messages WHERE chat_id = ?1",
            params![id.as_str()],
        )?;
        let chats = tx.execute("DELETE FROM chats WHERE id = ?1", params![id.as_str()])?;

        tx.commit()?;

        tracing::info!(chat = %id, messages, queued, "chat deleted");
        Ok(chats > 0)
    }
}

// ----------------------------------------------------------------------
// Connection-level helpers, usable inside a transaction
// ----------------------------------------------------------------------

fn upsert_chat(conn: &Connection, chat: &Chat) -> Result<()> {
    let participants = serde_json::to_string(&chat.participants)?;
    let names = serde_json::to_string(&chat.participant_names)?;
    let (lm_content, lm_ts, lm_sender) = match &chat.last_message {
        Some(lm) => (
            Some(lm.content.as_str()),
            Some(to_storage_string(&lm.timestamp)),
            Some(lm.sender_id.as_str()),
        ),
        None => (None, None, None),
    };

    conn.execute(
        "INSERT INTO chats (id, participants_json, participant_names_json,
                            last_message_content, last_message_timestamp, last_message_sender_id,
                            created_at, updated_at, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, MAX(?7, ?8), ?9)
         ON CONFLICT(id) DO UPDATE SET
            participants_json      = excluded.participants_json,
            participant_names_json = excluded.participant_names_json,
            last_message_content   = excluded.last_message_content,
            last_message_timestamp = excluded.last_message_timestamp,
            last_message_sender_id = excluded.last_message_sender_id,
            created_at             = excluded.created_at,
            updated_at             = excluded.updated_at,
            is_active              = excluded.is_active",
        params![
            chat.id.as_str(),
            participants,
            names,
            lm_content,
            lm_ts,
            lm_sender,
            to_storage_string(&chat.created_at),
            to_storage_string(&chat.updated_at),
            chat.is_active,
        ],
    )?;
    Ok(())
}

/// Recompute `last_message` and `updated_at` of a chat from its messages.
///
/// Only moves forward: a stored summary that is newer than every cached
/// message (the remote may know more than we do) is kept.
pub(crate) fn refresh_chat_summary(conn: &Connection, chat_id: &ChatId) -> Result<()> {
    let newest: Option<(String, String, String)> = conn
        .query_row(
            "SELECT content, timestamp, sender_id
             FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT 1",
            params![chat_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    if let Some((content, ts, sender)) = newest {
        // SET expressions all see the pre-update row.
        conn.execute(
            "UPDATE chats SET
                last_message_content = CASE
                    WHEN last_message_timestamp IS NULL OR last_message_timestamp < ?2
                    THEN ?1 ELSE last_message_content END,
                last_message_sender_id = CASE
                    WHEN last_message_timestamp IS NULL OR last_message_timestamp < ?2
                    THEN ?3 ELSE last_message_sender_id END,
                last_message_timestamp = CASE
                    WHEN last_message_timestamp IS NULL OR last_message_timestamp < ?2
                    THEN ?2 ELSE last_message_timestamp END
             WHERE id = ?4",
            params![content, ts, sender, chat_id.as_str()],
        )?;
    }

    conn.execute(
        "UPDATE chats
         SET updated_at = MAX(updated_at, created_at, COALESCE(last_message_timestamp, updated_at))
         WHERE id = ?1",
        params![chat_id.as_str()],
    )?;
    Ok(())
}

pub(crate) fn chat_exists(conn: &Connection, id: &ChatId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM chats WHERE id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn fetch_chat(conn: &Connection, id: &ChatId) -> Result<Option<Chat>> {
    Ok(conn
        .query_row(
            &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
            params![id.as_str()],
            row_to_chat,
        )
        .optional()?)
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let id: String = row.get(0)?;
    let lm_content: Option<String> = row.get(3)?;
    let lm_timestamp = get_opt_timestamp(row, 4)?;
    let lm_sender: Option<String> = row.get(5)?;

    let last_message = match (lm_content, lm_timestamp, lm_sender) {
        (Some(content), Some(timestamp), Some(sender)) => Some(LastMessage {
            content,
            timestamp,
            sender_id: sender.into(),
        }),
        _ => None,
    };

    Ok(Chat {
        id: ChatId(id),
        participants: get_json(row, 1)?,
        participant_names: get_json(row, 2)?,
        last_message,
        created_at: get_timestamp(row, 6)?,
        updated_at: get_timestamp(row, 7)?,
        is_active: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageStatus;
    use crate::test_support::{chat, message_at, ts};

    #[test]
    fn test_save_chat_is_idempotent_upsert() {
        let db = Database::open_in_memory().unwrap();
        let mut c = chat("c1", 10);

        db.save_chat(&c).unwrap();
        db.save_chat(&c).unwrap();
        assert_eq!(db.get_all_chats().unwrap().len(), 1);

        c.last_message = Some(LastMessage {
            content: "replaced".into(),
            timestamp: ts(50),
            sender_id: "u2".into(),
        });
        c.participant_names.insert("u2".into(), "Bobby".into());
        db.save_chat(&c).unwrap();

        let stored = db.get_chat(&c.id).unwrap();
        assert_eq!(stored.last_message.as_ref().unwrap().content, "replaced");
        assert_eq!(stored.name_of(&"u2".into()), Some("Bobby"));
        assert_eq!(db.get_all_chats().unwrap().len(), 1);
    }

    #[test]
    fn test_updated_at_never_before_created_at() {
        let db = Database::open_in_memory().unwrap();
        let mut c = chat("c1", 500);
        c.updated_at = ts(100);

        let stored = db.save_chat(&c).unwrap();
        assert_eq!(stored.updated_at, ts(500));
    }

    #[test]
    fn test_save_chat_keeps_newer_cached_message() {
        let db = Database::open_in_memory().unwrap();
        let c = chat("c1", 10);
        db.save_chat(&c).unwrap();
        db.save_message(&message_at("c1", "m1", "u1", 300, MessageStatus::Sent))
            .unwrap();

        // A stale summary from the remote must not hide the cached message.
        let mut stale = c.clone();
        stale.last_message = Some(LastMessage {
            content: "older".into(),
            timestamp: ts(200),
            sender_id: "u2".into(),
        });
        let stored = db.save_chat(&stale).unwrap();

        let lm = stored.last_message.unwrap();
        assert_eq!(lm.timestamp, ts(300));
        assert_eq!(lm.sender_id.as_str(), "u1");
        assert_eq!(stored.updated_at, ts(300));
    }

    #[test]
    fn test_get_all_chats_ordering_and_filter() {
        let db = Database::open_in_memory().unwrap();

        let mut a = chat("a", 10);
        a.updated_at = ts(100);
        let mut b = chat("b", 20);
        b.updated_at = ts(300);
        let mut c = chat("c", 30);
        c.updated_at = ts(100);
        let mut d = chat("d", 10);
        d.updated_at = ts(100);
        let mut gone = chat("gone", 10);
        gone.updated_at = ts(999);
        gone.is_active = false;

        for ch in [&a, &b, &c, &d, &gone] {
            db.save_chat(ch).unwrap();
        }

        let ids: Vec<String> = db
            .get_all_chats()
            .unwrap()
            .into_iter()
            .map(|c| c.id.0)
            .collect();
        // b newest; c ties a/d on updated_at but was created later; a < d by id.
        assert_eq!(ids, vec!["b", "c", "a", "d"]);
    }

    #[test]
    fn test_deactivate_hides_chat() {
        let db = Database::open_in_memory().unwrap();
        db.save_chat(&chat("c1", 10)).unwrap();

        assert!(db.deactivate_chat(&"c1".into()).unwrap());
        assert!(db.get_all_chats().unwrap().is_empty());
        assert!(!db.get_chat(&"c1".into()).unwrap().is_active);
        assert!(!db.deactivate_chat(&"nope".into()).unwrap());
    }

    #[test]
    fn test_delete_chat_cascades() {
        let db = Database::open_in_memory().unwrap();
        db.save_chat(&chat("c1", 10)).unwrap();
        db.save_chat(&chat("c2", 10)).unwrap();

        let failed = message_at("c1", "m1", "u1", 100, MessageStatus::Failed);
        db.save_message_with_sync_entry(&failed).unwrap();
        db.save_message(&message_at("c1", "m2", "u2", 200, MessageStatus::Sent))
            .unwrap();
        db.save_message(&message_at("c2", "m3", "u2", 200, MessageStatus::Sent))
            .unwrap();

        assert!(db.delete_chat(&"c1".into()).unwrap());

        assert!(db.get_messages_for_chat(&"c1".into()).unwrap().is_empty());
        assert!(db.find_chat(&"c1".into()).unwrap().is_none());
        assert_eq!(db.sync_queue_len().unwrap(), 0);
        assert_eq!(db.get_messages_for_chat(&"c2".into()).unwrap().len(), 1);

        assert!(!db.delete_chat(&"c1".into()).unwrap());
    }
}
