use tokio::sync::mpsc;

use pairchat_shared::ChatId;
use pairchat_store::{Chat, Message};

use crate::error::RemoteError;
use crate::notify::NotificationRequest;
use crate::outbox::DrainReport;

/// Events sent from the sync layer to the UI.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The active chat list changed (already sorted for display).
    ChatsUpdated(Vec<Chat>),
    /// The messages of a chat changed (ascending order).
    MessagesUpdated { chat_id: ChatId, messages: Vec<Message> },
    /// A notification was handed to the notifier.
    NotificationFired(NotificationRequest),
    /// A queue drain finished.
    QueueDrained(DrainReport),
    ConnectivityChanged { online: bool },
    /// A subscription reported an error; cached data is still served.
    SubscriptionError { scope: String, error: RemoteError },
}

/// Non-blocking sender side of the event channel.
///
/// A full channel drops the event: every event carries complete state, so
/// the next one supersedes it.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<SyncEvent>>,
}

impl EventSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(event = event_name(&event), "event channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("event receiver gone");
            }
        }
    }
}

fn event_name(event: &SyncEvent) -> &'static str {
    match event {
        SyncEvent::ChatsUpdated(_) => "chats_updated",
        SyncEvent::MessagesUpdated { .. } => "messages_updated",
        SyncEvent::NotificationFired(_) => "notification_fired",
        SyncEvent::QueueDrained(_) => "queue_drained",
        SyncEvent::ConnectivityChanged { .. } => "connectivity_changed",
        SyncEvent::SubscriptionError { .. } => "subscription_error",
    }
}
