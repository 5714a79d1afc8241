use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sync_queue (
    id          TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    operation   TEXT NOT NULL,                 -- e.g. 'send_message'
    table_name  TEXT NOT NULL,
    record_id   TEXT NOT NULL,
    data_json   TEXT NOT NULL,                 -- full payload to replay
    created_at  TEXT NOT NULL,                 -- ISO-8601
    retry_count INTEGER NOT NULL DEFAULT 0,

    UNIQUE (operation, record_id)
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_created ON sync_queue(created_at ASC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
