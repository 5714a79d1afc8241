//! v001 -- Initial schema creation.
//!
//! Creates the `chats` and `messages` tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                      TEXT PRIMARY KEY NOT NULL,  -- opaque remote id
    participants_json       TEXT NOT NULL,              -- JSON array of user ids
    participant_names_json  TEXT NOT NULL,              -- JSON object id -> name
    last_message_content    TEXT,
    last_message_timestamp  TEXT,                       -- ISO-8601 / RFC-3339
    last_message_sender_id  TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    is_active               INTEGER NOT NULL DEFAULT 1, -- boolean 0/1

    CHECK (is_active IN (0, 1))
);

CREATE INDEX IF NOT EXISTS idx_chats_active_updated
    ON chats(is_active, updated_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,      -- shared with the remote store
    chat_id     TEXT NOT NULL,                  -- FK -> chats(id)
    sender_id   TEXT NOT NULL,
    sender_name TEXT NOT NULL,
    content     TEXT NOT NULL,
    timestamp   TEXT NOT NULL,                  -- ISO-8601
    type        TEXT NOT NULL DEFAULT 'text',
    status      TEXT NOT NULL DEFAULT 'sending',

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,

    CHECK (type IN ('text', 'image')),
    CHECK (status IN ('sending', 'sent', 'delivered', 'read', 'failed'))
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, timestamp ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
