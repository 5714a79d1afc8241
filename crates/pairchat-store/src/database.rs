//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. There is no global handle:
//! callers open a `Database` explicitly, share it (the sync layer wraps it in
//! `Arc<tokio::sync::Mutex<_>>`) and close it when done.
//!
//! If the file on disk cannot be used at all (not a database, corrupted, or a
//! schema the migrations cannot repair), the file is deleted and recreated.
//! That path loses every cached row and is logged at `error` level as a
//! rebuild. Any other failure (a lock held by another process, I/O, missing
//! permissions) is returned to the caller with the file untouched.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use pairchat_shared::constants::APP_NAME;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/pairchat/pairchat.db`
    /// - macOS:   `~/Library/Application Support/app.pairchat.pairchat/pairchat.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\pairchat\pairchat\data\pairchat.db`
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "opening database");

        Self::open_at(&path)
    }

    /// Location used by [`Database::open_default`].
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("app", APP_NAME, APP_NAME).ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join(format!("{APP_NAME}.db")))
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// Falls back to a destructive rebuild only when the existing file is not
    /// a usable database (see [`StoreError::requires_rebuild`]).
    pub fn open_at(path: &Path) -> Result<Self> {
        match Self::open_and_migrate(path) {
            Ok(db) => Ok(db),
            Err(err) if err.requires_rebuild() => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "local cache unusable, rebuilding database from scratch (cached data will be lost)"
                );
                remove_database_files(path)?;
                Self::open_and_migrate(path)
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not open database");
                Err(err)
            }
        }
    }

    /// Open a private in-memory database. Nothing survives [`Database::close`].
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&mut conn)?;
        Ok(Self { conn })
    }

    fn open_and_migrate(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    /// Flush and close the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    ///
    /// Callers should prefer the typed CRUD helpers, but direct access is
    /// occasionally needed for ad-hoc queries.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// Schema version recorded in the file.
    pub fn schema_version(&self) -> Result<u32> {
        Ok(self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?)
    }
}

fn remove_database_files(path: &Path) -> Result<()> {
    let mut candidates = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm"] {
        let mut os = path.as_os_str().to_owned();
        os.push(suffix);
        candidates.push(PathBuf::from(os));
    }

    for file in candidates {
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
