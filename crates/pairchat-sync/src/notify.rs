//! Deciding whether a message deserves a user-facing alert.
//!
//! The [`NotificationGate`] keeps one watermark per chat: the timestamp of the
//! newest message already notified (or seen). A message qualifies only when
//! it is strictly newer than the watermark and its chat is not on screen.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use pairchat_shared::ChatId;

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct GateState {
    /// The chat currently on screen, if any.
    watched: Option<ChatId>,
    watermarks: HashMap<ChatId, DateTime<Utc>>,
}

/// Per-chat notification bookkeeping, safe to share between tasks.
#[derive(Debug, Default)]
pub struct NotificationGate {
    state: Mutex<GateState>,
}

impl NotificationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The UI entered a chat screen.
    pub fn set_current_chat(&self, chat_id: &ChatId) {
        self.lock().watched = Some(chat_id.clone());
    }

    /// The UI left whatever chat screen it was on.
    pub fn leave_chat(&self) {
        self.lock().watched = None;
    }

    pub fn current_chat(&self) -> Option<ChatId> {
        self.lock().watched.clone()
    }

    pub fn is_watched(&self, chat_id: &ChatId) -> bool {
        self.lock().watched.as_ref() == Some(chat_id)
    }

    /// Whether a message at `ts` in `chat_id` would qualify for an alert.
    pub fn should_notify(&self, chat_id: &ChatId, ts: DateTime<Utc>) -> bool {
        let state = self.lock();
        if state.watched.as_ref() == Some(chat_id) {
            return false;
        }
        state.watermarks.get(chat_id).map_or(true, |w| ts > *w)
    }

    /// Raise the watermark of `chat_id` to `ts`. Never lowers it.
    pub fn update_last_message_time(&self, chat_id: &ChatId, ts: DateTime<Utc>) {
        let mut state = self.lock();
        advance(&mut state.watermarks, chat_id, ts);
    }

    /// Check and advance in one step.
    ///
    /// Returns `true` exactly once per `(chat_id, ts)` that qualifies. A
    /// message in the watched chat still advances the watermark (the user saw
    /// it) but returns `false`.
    pub fn try_claim(&self, chat_id: &ChatId, ts: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        let watched = state.watched.as_ref() == Some(chat_id);
        let newer = advance(&mut state.watermarks, chat_id, ts);
        newer && !watched
    }

    /// Forget every watermark.
    pub fn reset_notification_state(&self) {
        let mut state = self.lock();
        let cleared = state.watermarks.len();
        state.watermarks.clear();
        tracing::debug!(cleared, "notification watermarks reset");
    }

    pub fn watermark(&self, chat_id: &ChatId) -> Option<DateTime<Utc>> {
        self.lock().watermarks.get(chat_id).copied()
    }
}

/// Returns whether the watermark moved.
fn advance(
    watermarks: &mut HashMap<ChatId, DateTime<Utc>>,
    chat_id: &ChatId,
    ts: DateTime<Utc>,
) -> bool {
    match watermarks.get_mut(chat_id) {
        Some(current) if ts <= *current => false,
        Some(current) => {
            *current = ts;
            true
        }
        None => {
            watermarks.insert(chat_id.clone(), ts);
            true
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub chat_id: ChatId,
}

/// What the OS-level presenter is asked to show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// Sender display name.
    pub title: String,
    pub body: String,
    pub payload: NotificationPayload,
}

impl NotificationRequest {
    pub fn new(chat_id: ChatId, sender_name: &str, content: &str, body_chars: usize) -> Self {
        Self {
            title: sender_name.to_string(),
            body: truncate_body(content, body_chars),
            payload: NotificationPayload { chat_id },
        }
    }
}

/// First `max_chars` characters of `content`, with `...` when cut.
pub fn truncate_body(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Fire-and-forget notification sink. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, request: NotificationRequest);
}

/// Writes notifications to the log. Used when no presenter is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, request: NotificationRequest) {
        tracing::info!(
            chat = %request.payload.chat_id,
            title = %request.title,
            body = %request.body,
            "notification"
        );
    }
}

/// Forwards notifications over a bounded channel to a presenter task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<NotificationRequest>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<NotificationRequest>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, request: NotificationRequest) {
        if let Err(e) = self.tx.try_send(request) {
            tracing::warn!(error = %e, "notification dropped");
        }
    }
}
