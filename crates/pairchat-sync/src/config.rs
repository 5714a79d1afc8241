use std::time::Duration;

use pairchat_shared::constants::{
    CONNECTIVITY_POLL_SECS, NOTIFICATION_BODY_CHARS, REMOTE_TIMEOUT_SECS, SYNC_RETRY_CEILING,
};

/// Tunables for the sync layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Interval of the polling connectivity observer.
    pub poll_interval: Duration,
    /// Failed queue replays before a message is given up on.
    pub retry_ceiling: u32,
    /// Upper bound on every remote call.
    pub remote_timeout: Duration,
    /// Notification body length before the ellipsis.
    pub notification_body_chars: usize,
    /// First delay before resubscribing after a stream ends.
    pub resubscribe_backoff_min: Duration,
    /// Cap for the doubling resubscribe delay.
    pub resubscribe_backoff_max: Duration,
    /// Capacity of the UI event channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(CONNECTIVITY_POLL_SECS),
            retry_ceiling: SYNC_RETRY_CEILING,
            remote_timeout: Duration::from_secs(REMOTE_TIMEOUT_SECS),
            notification_body_chars: NOTIFICATION_BODY_CHARS,
            resubscribe_backoff_min: Duration::from_secs(1),
            resubscribe_backoff_max: Duration::from_secs(30),
            event_buffer: 256,
        }
    }
}

impl SyncConfig {
    /// Delay to use after `current`, doubling up to the cap.
    pub fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(2)
            .min(self.resubscribe_backoff_max)
            .max(self.resubscribe_backoff_min)
    }
}
