//! Local-first synchronization between a remote real-time store and the
//! on-device cache.
//!
//! Snapshots from the [`RemoteSyncSource`] are merged into the store by the
//! [`Reconciler`], which also feeds genuinely new messages through the
//! [`NotificationGate`]. Outgoing messages go through the
//! [`OfflineSendQueue`], which writes locally first and replays failed sends
//! when connectivity returns. [`SyncService`] wires everything together.

use std::sync::Arc;

use pairchat_store::Database;

pub mod config;
pub mod connectivity;
pub mod convert;
pub mod error;
pub mod events;
pub mod memory;
pub mod notify;
pub mod outbox;
pub mod reconcile;
pub mod remote;
pub mod service;
pub mod subscription;

pub use config::SyncConfig;
pub use connectivity::{
    ConnectivityEdge, ConnectivityProbe, ConnectivityWatcher, EdgeDetector, ManualConnectivity,
    PollingObserver, TcpProbe,
};
pub use error::{RemoteError, Result, SyncError};
pub use events::{EventSink, SyncEvent};
pub use memory::MemoryRemote;
pub use notify::{
    ChannelNotifier, LogNotifier, NotificationGate, NotificationPayload, NotificationRequest,
    Notifier,
};
pub use outbox::{DeliveryOutcome, DrainReport, OfflineSendQueue, PendingSend};
pub use reconcile::{NewMessage, ReconcileReport, Reconciler};
pub use remote::{RemoteSyncSource, SnapshotStream};
pub use service::SyncService;
pub use subscription::{Subscription, SubscriptionState};

/// The store handle shared by every task. Each write is serialized here.
pub type SharedDatabase = Arc<tokio::sync::Mutex<Database>>;

/// Wrap an opened database for sharing.
pub fn share(db: Database) -> SharedDatabase {
    Arc::new(tokio::sync::Mutex::new(db))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use pairchat_shared::protocol::{RemoteChat, RemoteLastMessage, RemoteMessage};
    use pairchat_shared::{LocalUser, RawTimestamp};

    use crate::notify::{NotificationRequest, Notifier};

    pub fn alice() -> LocalUser {
        LocalUser::new("u1", "Alice")
    }

    pub fn bob() -> LocalUser {
        LocalUser::new("u2", "Bob")
    }

    /// Chat between u1 and u2 created at t=10ms, optionally with a last message
    /// `(sender, millis, content)`.
    pub fn remote_chat(id: &str, last: Option<(&str, i64, &str)>) -> RemoteChat {
        let updated = last.map_or(10, |(_, t, _)| t);
        RemoteChat {
            id: id.to_string(),
            participants: vec!["u1".into(), "u2".into()],
            participant_names: [
                ("u1".to_string(), "Alice".to_string()),
                ("u2".to_string(), "Bob".to_string()),
            ]
            .into(),
            created_at: RawTimestamp::EpochMillis(10),
            updated_at: RawTimestamp::EpochMillis(updated),
            last_message: last.map(|(sender, t, content)| RemoteLastMessage {
                content: content.to_string(),
                timestamp: RawTimestamp::EpochMillis(t),
                sender_id: sender.to_string(),
            }),
            is_active: true,
        }
    }

    pub fn remote_message(chat: &str, id: &str, sender: &str, millis: i64) -> RemoteMessage {
        let name = if sender == "u1" { "Alice" } else { "Bob" };
        RemoteMessage {
            id: id.to_string(),
            chat_id: chat.to_string(),
            sender_id: sender.to_string(),
            sender_name: name.to_string(),
            content: format!("message {id}"),
            timestamp: RawTimestamp::EpochMillis(millis),
            message_type: "text".to_string(),
        }
    }

    /// Notifier that remembers every request.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub seen: Mutex<Vec<NotificationRequest>>,
    }

    impl RecordingNotifier {
        pub fn count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, request: NotificationRequest) {
            self.seen.lock().unwrap().push(request);
        }
    }
}
