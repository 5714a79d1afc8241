//! Column conversion helpers shared by the row mappers.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use pairchat_shared::timestamp;

/// Wrap a parse failure as a rusqlite conversion error for column `idx`.
pub(crate) fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Read an RFC 3339 text column.
pub(crate) fn get_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    timestamp::parse_iso(&raw).map_err(|e| conversion_err(idx, e))
}

/// Read a nullable RFC 3339 text column.
pub(crate) fn get_opt_timestamp(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| timestamp::parse_iso(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

/// Read a text column through `FromStr`.
pub(crate) fn get_parsed<T>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_err(idx, e))
}

/// Read a JSON text column.
pub(crate) fn get_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_err(idx, e))
}
