use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimestampError {
    #[error("Unparseable ISO-8601 timestamp: {0}")]
    InvalidIso(String),

    #[error("Epoch value out of range: {0}")]
    OutOfRange(i64),

    #[error("Invalid nanosecond component: {0}")]
    InvalidNanos(u32),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session payload is empty")]
    Empty,

    #[error("Session payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Session payload is missing a session id")]
    MissingSessionId,

    #[error("Session id contains invalid characters: {0}")]
    InvalidSessionId(String),
}
