//! Types shared by every pairchat crate: identifiers, the canonical timestamp
//! parser, remote wire DTOs and the QR/manual session join payload.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod session;
pub mod timestamp;
pub mod types;

pub use error::{SessionError, TimestampError};
pub use timestamp::{parse_timestamp, RawTimestamp};
pub use types::{ChatId, LocalUser, MessageId, UserId};
