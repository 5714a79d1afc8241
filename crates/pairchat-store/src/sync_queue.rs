//! The pending-operation queue.
//!
//! An entry exists exactly as long as its remote write is unconfirmed. The
//! combined operations at the bottom of this file change the queue and the
//! owning message in one transaction so the two never disagree.

use rusqlite::{params, Connection, OptionalExtension};

use pairchat_shared::timestamp::to_storage_string;
use pairchat_shared::MessageId;

use crate::chats::refresh_chat_summary;
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::upsert_message;
use crate::models::{Message, SyncOperation, SyncQueueEntry};
use crate::rows::{get_parsed, get_timestamp};

const ENTRY_COLUMNS: &str =
    "id, operation, table_name, record_id, data_json, created_at, retry_count";

impl Database {
    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    /// Queue a write. A second entry for the same operation and record is
    /// ignored; returns whether a row was inserted.
    pub fn enqueue_sync(&self, entry: &SyncQueueEntry) -> Result<bool> {
        insert_entry(self.conn(), entry)
    }

    /// Entries in replay order: oldest first, then insertion order.
    pub fn pending_sync_entries(&self) -> Result<Vec<SyncQueueEntry>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM sync_queue
             ORDER BY created_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn sync_entry_for_record(
        &self,
        operation: SyncOperation,
        record_id: &str,
    ) -> Result<Option<SyncQueueEntry>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM sync_queue
                     WHERE operation = ?1 AND record_id = ?2"
                ),
                params![operation.as_str(), record_id],
                row_to_entry,
            )
            .optional()?)
    }

    /// Increment the retry counter of an entry and return the new value.
    pub fn bump_retry_count(&self, entry_id: &str) -> Result<u32> {
        self.conn()
            .query_row(
                "UPDATE sync_queue SET retry_count = retry_count + 1
                 WHERE id = ?1
                 RETURNING retry_count",
                params![entry_id],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    pub fn remove_sync_entry(&self, entry_id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
        Ok(affected > 0)
    }

    pub fn sync_queue_len(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Combined queue + message operations
    // ------------------------------------------------------------------

    /// A queued write succeeded: drop the entry and mark the message `sent`.
    pub fn complete_sync_entry(&self, entry_id: &str, message_id: &MessageId) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
        promote_to(&tx, message_id, "sent")?;
        tx.commit()?;
        Ok(())
    }

    /// A queued write hit the retry ceiling: drop the entry and leave the
    /// message permanently `failed`.
    pub fn abandon_sync_entry(&self, entry_id: &str, message_id: &MessageId) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        tx.execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
        promote_to(&tx, message_id, "failed")?;
        tx.commit()?;
        tracing::warn!(message = %message_id, "queued send abandoned after retry ceiling");
        Ok(())
    }

    /// Store a message that could not be sent together with its queue entry.
    pub fn save_message_with_sync_entry(&self, message: &Message) -> Result<SyncQueueEntry> {
        let entry = SyncQueueEntry::send_message(message)?;

        let tx = self.conn().unchecked_transaction()?;
        upsert_message(&tx, message)?;
        refresh_chat_summary(&tx, &message.chat_id)?;
        insert_entry(&tx, &entry)?;
        tx.commit()?;

        Ok(entry)
    }

    /// A first remote attempt failed: mark the message `failed` and make sure
    /// a queue entry carries it.
    pub fn fail_message_and_enqueue(&self, message: &Message) -> Result<()> {
        let entry = SyncQueueEntry::send_message(message)?;

        let tx = self.conn().unchecked_transaction()?;
        promote_to(&tx, &message.id, "failed")?;
        insert_entry(&tx, &entry)?;
        tx.commit()?;
        Ok(())
    }

    /// The remote acknowledged a message: mark it `sent` and drop any queued
    /// replay of it.
    pub fn confirm_message_sent(&self, message_id: &MessageId) -> Result<()> {
        let tx = self.conn().unchecked_transaction()?;
        promote_to(&tx, message_id, "sent")?;
        tx.execute(
            "DELETE FROM sync_queue WHERE operation = ?1 AND record_id = ?2",
            params![SyncOperation::SendMessage.as_str(), message_id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn insert_entry(conn: &Connection, entry: &SyncQueueEntry) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO sync_queue (id, operation, table_name, record_id, data_json, created_at, retry_count)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(operation, record_id) DO NOTHING",
        params![
            entry.id,
            entry.operation.as_str(),
            entry.table_name,
            entry.record_id,
            entry.data,
            to_storage_string(&entry.created_at),
            entry.retry_count,
        ],
    )?;
    if affected > 0 {
        tracing::debug!(record = %entry.record_id, op = entry.operation.as_str(), "sync entry queued");
    }
    Ok(affected > 0)
}

/// Set an outgoing message's status unless receipts already moved it past
/// `sent`.
fn promote_to(conn: &Connection, message_id: &MessageId, status: &str) -> Result<()> {
    conn.execute(
        "UPDATE messages SET status = ?1
         WHERE id = ?2 AND status IN ('sending', 'failed', 'sent')
           AND NOT (status = 'sent' AND ?1 = 'failed')",
        params![status, message_id.as_str()],
    )?;
    Ok(())
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<SyncQueueEntry> {
    Ok(SyncQueueEntry {
        id: row.get(0)?,
        operation: get_parsed(row, 1)?,
        table_name: row.get(2)?,
        record_id: row.get(3)?,
        data: row.get(4)?,
        created_at: get_timestamp(row, 5)?,
        retry_count: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageStatus;
    use crate::test_support::{chat, message_at, ts};

    fn db_with_chat() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.save_chat(&chat("c1", 10)).unwrap();
        db
    }

    #[test]
    fn test_offline_message_and_entry_written_together() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Failed);

        let entry = db.save_message_with_sync_entry(&m).unwrap();

        assert_eq!(db.sync_queue_len().unwrap(), 1);
        assert_eq!(
            db.get_messages_for_chat(&"c1".into()).unwrap()[0].status,
            MessageStatus::Failed
        );
        let found = db
            .sync_entry_for_record(SyncOperation::SendMessage, "m1")
            .unwrap()
            .unwrap();
        assert_eq!(found.id, entry.id);
        assert_eq!(found.message().unwrap(), m);
    }

    #[test]
    fn test_enqueue_is_idempotent_per_record() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Failed);
        db.save_message(&m).unwrap();

        assert!(db.enqueue_sync(&SyncQueueEntry::send_message(&m).unwrap()).unwrap());
        assert!(!db.enqueue_sync(&SyncQueueEntry::send_message(&m).unwrap()).unwrap());
        assert_eq!(db.sync_queue_len().unwrap(), 1);
    }

    #[test]
    fn test_pending_entries_are_fifo() {
        let db = db_with_chat();
        let mut ids = Vec::new();
        for (i, created) in [(1, 300), (2, 100), (3, 100)] {
            let m = message_at("c1", &format!("m{i}"), "u1", created, MessageStatus::Failed);
            db.save_message(&m).unwrap();
            let mut entry = SyncQueueEntry::send_message(&m).unwrap();
            entry.created_at = ts(created);
            db.enqueue_sync(&entry).unwrap();
            ids.push(entry.record_id);
        }

        let order: Vec<String> = db
            .pending_sync_entries()
            .unwrap()
            .into_iter()
            .map(|e| e.record_id)
            .collect();
        // m2 and m3 share created_at; insertion order breaks the tie.
        assert_eq!(order, vec!["m2", "m3", "m1"]);
    }

    #[test]
    fn test_retry_bookkeeping() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Failed);
        let entry = db.save_message_with_sync_entry(&m).unwrap();

        assert_eq!(db.bump_retry_count(&entry.id).unwrap(), 1);
        assert_eq!(db.bump_retry_count(&entry.id).unwrap(), 2);
        assert!(matches!(
            db.bump_retry_count("missing"),
            Err(StoreError::NotFound)
        ));

        db.abandon_sync_entry(&entry.id, &m.id).unwrap();
        assert_eq!(db.sync_queue_len().unwrap(), 0);
        assert_eq!(db.get_message(&m.id).unwrap().status, MessageStatus::Failed);
    }

    #[test]
    fn test_complete_entry_marks_sent() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Failed);
        let entry = db.save_message_with_sync_entry(&m).unwrap();

        db.complete_sync_entry(&entry.id, &m.id).unwrap();

        assert_eq!(db.sync_queue_len().unwrap(), 0);
        assert_eq!(db.get_message(&m.id).unwrap().status, MessageStatus::Sent);
    }

    #[test]
    fn test_fail_then_confirm() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Sending);
        db.save_message(&m).unwrap();

        db.fail_message_and_enqueue(&m).unwrap();
        assert_eq!(db.get_message(&m.id).unwrap().status, MessageStatus::Failed);
        assert_eq!(db.sync_queue_len().unwrap(), 1);

        db.confirm_message_sent(&m.id).unwrap();
        assert_eq!(db.get_message(&m.id).unwrap().status, MessageStatus::Sent);
        assert_eq!(db.sync_queue_len().unwrap(), 0);
    }

    #[test]
    fn test_receipts_are_not_downgraded() {
        let db = db_with_chat();
        let m = message_at("c1", "m1", "u1", 100, MessageStatus::Delivered);
        db.save_message(&m).unwrap();

        db.confirm_message_sent(&m.id).unwrap();
        assert_eq!(
            db.get_message(&m.id).unwrap().status,
            MessageStatus::Delivered
        );
    }
}
