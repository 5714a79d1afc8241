//! Database migration runner.
//!
//! Migrations are executed in order on every [`Database::open_at`] /
//! [`Database::open_in_memory`] call. Each migration runs in its own
//! transaction together with the `user_version` bump, so it applies exactly
//! once or not at all.
//!
//! When a migration statement is rejected by the existing schema, or the file
//! carries a version newer than this build knows about, every table is dropped
//! and the schema is recreated from version 0. That is a last resort and is
//! logged at `error` level. Environmental failures (a busy or locked file, I/O,
//! a full disk) are returned unchanged and leave the data alone.
//!
//! [`Database::open_at`]: crate::Database::open_at
//! [`Database::open_in_memory`]: crate::Database::open_in_memory

pub mod v001_initial;
pub mod v002_sync_queue;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version. Bump this and add a new migration module whenever
/// the schema changes.
pub const CURRENT_VERSION: u32 = 2;

type MigrationFn = fn(&Connection) -> std::result::Result<(), rusqlite::Error>;

const MIGRATIONS: &[(u32, &str, MigrationFn)] = &[
    (1, "v001_initial", v001_initial::up),
    (2, "v002_sync_queue", v002_sync_queue::up),
];

/// Run all pending migrations against the open connection.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    tracing::info!(
        current_version = current,
        target_version = CURRENT_VERSION,
        "checking database migrations"
    );

    if current > CURRENT_VERSION {
        tracing::error!(
            found = current,
            supported = CURRENT_VERSION,
            "database schema is newer than this build, rebuilding schema (cached data will be lost)"
        );
        rebuild_schema(conn)?;
        return apply_pending(conn, 0);
    }

    match apply_pending(conn, current) {
        Ok(()) => Ok(()),
        Err(err) if err.requires_rebuild() => {
            tracing::error!(
                error = %err,
                "migration failed, rebuilding schema (cached data will be lost)"
            );
            rebuild_schema(conn)?;
            apply_pending(conn, 0)
        }
        Err(err) => Err(err),
    }
}

fn apply_pending(conn: &mut Connection, from: u32) -> Result<()> {
    for (version, name, up) in MIGRATIONS {
        if from >= *version {
            continue;
        }
        tracing::info!(migration = *name, "applying migration");

        let tx = conn.transaction()?;
        up(&tx).map_err(|e| migration_error(name, e))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }
    Ok(())
}

fn migration_error(name: &str, err: rusqlite::Error) -> StoreError {
    use rusqlite::ErrorCode;

    let environmental = matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly
                | ErrorCode::CannotOpen
                | ErrorCode::PermissionDenied
                | ErrorCode::OutOfMemory
                | ErrorCode::OperationInterrupted
        )
    );
    if environmental {
        StoreError::Sqlite(err)
    } else {
        StoreError::Migration(format!("{name}: {err}"))
    }
}

/// Drop every user table and reset the schema version to 0.
fn rebuild_schema(conn: &mut Connection) -> Result<()> {
    // Foreign key enforcement cannot be toggled inside a transaction.
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    let result = drop_all_tables(conn);
    conn.pragma_update(None, "foreign_keys", "ON")?;
    result
}

fn drop_all_tables(conn: &mut Connection) -> Result<()> {
    let tables: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<std::result::Result<_, _>>()?
    };

    let tx = conn.transaction()?;
    for table in &tables {
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS \"{}\"",
            table.replace('"', "\"\"")
        ))?;
    }
    tx.pragma_update(None, "user_version", 0)?;
    tx.commit()?;

    tracing::warn!(dropped = tables.len(), "schema dropped for rebuild");
    Ok(())
}
