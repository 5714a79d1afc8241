/// Application name
pub const APP_NAME: &str = "pairchat";

/// Maximum message content length in characters
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Notification body length before truncation (characters, ellipsis excluded)
pub const NOTIFICATION_BODY_CHARS: usize = 50;

/// Queue retries before a message is permanently marked failed
pub const SYNC_RETRY_CEILING: u32 = 3;

/// Connectivity polling interval in seconds (portable fallback observer)
pub const CONNECTIVITY_POLL_SECS: u64 = 5;

/// Upper bound on any single remote call in seconds
pub const REMOTE_TIMEOUT_SECS: u64 = 10;

/// Number of participants the core chat logic supports
pub const CHAT_PARTICIPANTS: usize = 2;

/// Sync queue operation name for outgoing messages
pub const OP_SEND_MESSAGE: &str = "send_message";
