use thiserror::Error;

use pairchat_shared::{ChatId, TimestampError};

use crate::models::MessageStatus;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A message referenced a chat that is not in the cache.
    #[error("Unknown chat: {0}")]
    UnknownChat(ChatId),

    /// The delivery state machine forbids this status change.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored column held a value the model does not recognise.
    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    /// Timestamp parsing error.
    #[error("Timestamp parse error: {0}")]
    Timestamp(#[from] TimestampError),

    /// JSON column or payload error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// The file cannot serve as a cache at all: not a database, corrupted, or
    /// carrying a schema the migrations cannot repair. Only these justify
    /// deleting cached data.
    pub fn requires_rebuild(&self) -> bool {
        match self {
            StoreError::Migration(_) => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
            ),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
