//! Canonical timestamp handling.
//!
//! Remote records arrive with whatever timestamp encoding the backend used:
//! ISO-8601 strings, epoch milliseconds, or `{seconds, nanoseconds}` objects.
//! [`parse_timestamp`] is the single place those are turned into a
//! `DateTime<Utc>`. Everything past ingress works with that type only.
//!
//! Parsed values are truncated to millisecond precision, which is the
//! precision of the on-disk representation. This keeps a timestamp read back
//! from the store equal to the one that arrived from the remote.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TimestampError;

/// A timestamp in one of the encodings accepted at the system boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTimestamp {
    /// Backend-native object form.
    Remote {
        #[serde(alias = "_seconds")]
        seconds: i64,
        #[serde(alias = "_nanoseconds", default)]
        nanoseconds: u32,
    },
    /// Milliseconds since the Unix epoch.
    EpochMillis(i64),
    /// Fractional milliseconds since the Unix epoch.
    EpochMillisFloat(f64),
    /// RFC 3339 / ISO-8601 string.
    Iso(String),
}

impl From<DateTime<Utc>> for RawTimestamp {
    fn from(ts: DateTime<Utc>) -> Self {
        RawTimestamp::Iso(to_storage_string(&ts))
    }
}

/// Normalize any accepted encoding into a UTC timestamp (millisecond precision).
pub fn parse_timestamp(raw: &RawTimestamp) -> Result<DateTime<Utc>, TimestampError> {
    let ts = match raw {
        RawTimestamp::Remote {
            seconds,
            nanoseconds,
        } => {
            if *nanoseconds >= 1_000_000_000 {
                return Err(TimestampError::InvalidNanos(*nanoseconds));
            }
            DateTime::from_timestamp(*seconds, *nanoseconds)
                .ok_or(TimestampError::OutOfRange(*seconds))?
        }
        RawTimestamp::EpochMillis(ms) => {
            DateTime::from_timestamp_millis(*ms).ok_or(TimestampError::OutOfRange(*ms))?
        }
        RawTimestamp::EpochMillisFloat(ms) => {
            if !ms.is_finite() {
                return Err(TimestampError::InvalidIso(ms.to_string()));
            }
            let whole = ms.trunc() as i64;
            DateTime::from_timestamp_millis(whole).ok_or(TimestampError::OutOfRange(whole))?
        }
        RawTimestamp::Iso(s) => parse_iso(s)?,
    };
    Ok(truncate_to_millis(ts))
}

/// Parse an RFC 3339 string as stored in the local database.
pub fn parse_iso(s: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| truncate_to_millis(dt.with_timezone(&Utc)))
        .map_err(|_| TimestampError::InvalidIso(s.to_string()))
}

/// Fixed-width RFC 3339 form used for every stored timestamp.
///
/// Always UTC with millisecond precision, so lexical order matches
/// chronological order inside SQLite.
pub fn to_storage_string(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_encodings_agree() {
        let iso = RawTimestamp::Iso("2024-03-01T12:00:00.250Z".into());
        let millis = RawTimestamp::EpochMillis(1_709_294_400_250);
        let remote = RawTimestamp::Remote {
            seconds: 1_709_294_400,
            nanoseconds: 250_000_000,
        };

        let a = parse_timestamp(&iso).unwrap();
        assert_eq!(a, parse_timestamp(&millis).unwrap());
        assert_eq!(a, parse_timestamp(&remote).unwrap());
    }

    #[test]
    fn test_sub_millisecond_precision_is_dropped() {
        let remote = RawTimestamp::Remote {
            seconds: 0,
            nanoseconds: 100_999_999,
        };
        let ts = parse_timestamp(&remote).unwrap();
        assert_eq!(ts.timestamp_millis(), 100);
        assert_eq!(parse_iso(&to_storage_string(&ts)).unwrap(), ts);
    }

    #[test]
    fn test_offset_strings_normalize_to_utc() {
        let ts = parse_timestamp(&RawTimestamp::Iso("2024-03-01T14:00:00+02:00".into())).unwrap();
        assert_eq!(to_storage_string(&ts), "2024-03-01T12:00:00.000Z");
    }

    #[test]
    fn test_garbage_is_a_typed_error() {
        let err = parse_timestamp(&RawTimestamp::Iso("yesterday".into())).unwrap_err();
        assert_eq!(err, TimestampError::InvalidIso("yesterday".into()));

        let err = parse_timestamp(&RawTimestamp::Remote {
            seconds: 0,
            nanoseconds: 2_000_000_000,
        })
        .unwrap_err();
        assert!(matches!(err, TimestampError::InvalidNanos(_)));
    }

    #[test]
    fn test_untagged_deserialization() {
        let v: RawTimestamp = serde_json::from_str(r#"{"_seconds": 5, "_nanoseconds": 0}"#).unwrap();
        assert_eq!(parse_timestamp(&v).unwrap().timestamp(), 5);

        let v: RawTimestamp = serde_json::from_str("1500").unwrap();
        assert_eq!(v, RawTimestamp::EpochMillis(1500));

        let v: RawTimestamp = serde_json::from_str("1500.7").unwrap();
        assert_eq!(parse_timestamp(&v).unwrap().timestamp_millis(), 1500);

        let v: RawTimestamp = serde_json::from_str("\"1970-01-01T00:00:01Z\"").unwrap();
        assert_eq!(parse_timestamp(&v).unwrap().timestamp(), 1);
    }

    #[test]
    fn test_storage_strings_sort_chronologically() {
        let early = DateTime::from_timestamp_millis(100).unwrap();
        let late = DateTime::from_timestamp_millis(1_000_000).unwrap();
        assert!(to_storage_string(&early) < to_storage_string(&late));
    }
}
