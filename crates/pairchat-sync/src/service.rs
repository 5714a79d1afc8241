//! Composition root of the sync layer.
//!
//! [`SyncService::start`] wires the cache, the remote source, the
//! reconciler, the notification gate and the send queue together, starts
//! the chat-list subscription and the connectivity watcher, and hands back
//! the receiving end of the UI event channel. Everything it spawns is torn
//! down by [`SyncService::shutdown`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use pairchat_shared::protocol::{RemoteChat, RemoteMessage};
use pairchat_shared::session::SessionJoinPayload;
use pairchat_shared::{ChatId, LocalUser, UserId};
use pairchat_store::{Chat, Message};

use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEdge, ConnectivityWatcher};
use crate::convert::chat_from_remote;
use crate::error::{RemoteError, Result, SyncError};
use crate::events::{EventSink, SyncEvent};
use crate::notify::{NotificationGate, Notifier};
use crate::outbox::{DrainReport, OfflineSendQueue, PendingSend};
use crate::reconcile::Reconciler;
use crate::remote::{with_timeout, RemoteSyncSource, SnapshotStream};
use crate::subscription::{spawn_pump, SnapshotFeed, Subscription, SubscriptionState};
use crate::SharedDatabase;

pub struct SyncService {
    user: LocalUser,
    db: SharedDatabase,
    remote: Arc<dyn RemoteSyncSource>,
    gate: Arc<NotificationGate>,
    reconciler: Arc<Reconciler>,
    outbox: OfflineSendQueue,
    connectivity: ConnectivityWatcher,
    events: EventSink,
    config: SyncConfig,
    chat_subscription: Mutex<Option<Subscription>>,
    open_chat: Mutex<Option<(ChatId, Subscription)>>,
    connectivity_task: JoinHandle<()>,
}

impl SyncService {
    /// Start syncing for `user`.
    ///
    /// The cached chat list is emitted before the remote subscription opens,
    /// so the UI has something to show while offline.
    pub async fn start(
        db: SharedDatabase,
        remote: Arc<dyn RemoteSyncSource>,
        notifier: Arc<dyn Notifier>,
        connectivity: ConnectivityWatcher,
        user: LocalUser,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (events, rx) = EventSink::channel(config.event_buffer);
        let gate = Arc::new(NotificationGate::new());
        let reconciler = Arc::new(
            Reconciler::new(db.clone(), gate.clone(), notifier, user.id.clone(), &config)
                .with_events(events.clone()),
        );
        let outbox = OfflineSendQueue::new(
            db.clone(),
            remote.clone(),
            connectivity.clone(),
            config.clone(),
            events.clone(),
        );

        emit_chats(&db, &events).await;

        let chat_subscription = spawn_pump(
            format!("chats:{}", user.id),
            ChatFeed {
                remote: remote.clone(),
                user_id: user.id.clone(),
                reconciler: reconciler.clone(),
                db: db.clone(),
                events: events.clone(),
                config: config.clone(),
            },
            &config,
        );

        let connectivity_task = tokio::spawn(watch_connectivity(
            connectivity.clone(),
            outbox.clone(),
            events.clone(),
        ));

        tracing::info!(user = %user.id, online = connectivity.is_online(), "sync service started");

        let service = Self {
            user,
            db,
            remote,
            gate,
            reconciler,
            outbox,
            connectivity,
            events,
            config,
            chat_subscription: Mutex::new(Some(chat_subscription)),
            open_chat: Mutex::new(None),
            connectivity_task,
        };
        (service, rx)
    }

    pub fn local_user(&self) -> &LocalUser {
        &self.user
    }

    pub fn gate(&self) -> &Arc<NotificationGate> {
        &self.gate
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn chats(&self) -> Result<Vec<Chat>> {
        Ok(self.db.lock().await.get_all_chats()?)
    }

    pub async fn messages(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        Ok(self.db.lock().await.get_messages_for_chat(chat_id)?)
    }

    // ------------------------------------------------------------------
    // Chat screen lifecycle
    // ------------------------------------------------------------------

    /// The user entered a chat: suppress its notifications, mark it read and
    /// follow its messages. Returns the cached messages.
    pub async fn open_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        {
            let db = self.db.lock().await;
            if db.find_chat(chat_id)?.is_none() {
                return Err(SyncError::UnknownChat(chat_id.clone()));
            }
        }

        let mut open = self.open_chat.lock().await;
        self.gate.set_current_chat(chat_id);
        if let Some((previous, subscription)) = open.take() {
            tracing::debug!(chat = %previous, "switching chats");
            subscription.shutdown().await;
        }

        let messages = {
            let db = self.db.lock().await;
            db.mark_chat_read(chat_id, &self.user.id)?;
            db.get_messages_for_chat(chat_id)?
        };

        let subscription = spawn_pump(
            format!("messages:{chat_id}"),
            MessageFeed {
                remote: self.remote.clone(),
                chat_id: chat_id.clone(),
                user_id: self.user.id.clone(),
                reconciler: self.reconciler.clone(),
                gate: self.gate.clone(),
                db: self.db.clone(),
                events: self.events.clone(),
                config: self.config.clone(),
            },
            &self.config,
        );
        *open = Some((chat_id.clone(), subscription));

        tracing::info!(chat = %chat_id, cached = messages.len(), "chat opened");
        Ok(messages)
    }

    /// The user left the chat screen.
    pub async fn close_chat(&self) {
        let mut open = self.open_chat.lock().await;
        // The feed stops while the chat still counts as watched, so a
        // snapshot it is applying can neither notify nor miss the read mark.
        if let Some((chat_id, subscription)) = open.take() {
            subscription.shutdown().await;
            tracing::info!(chat = %chat_id, "chat closed");
        }
        self.gate.leave_chat();
    }

    pub async fn current_chat(&self) -> Option<ChatId> {
        self.open_chat
            .lock()
            .await
            .as_ref()
            .map(|(id, _)| id.clone())
    }

    /// Manual refresh: forget notification watermarks and re-emit the list.
    pub async fn refresh(&self) -> Result<Vec<Chat>> {
        self.gate.reset_notification_state();
        let chats = self.chats().await?;
        self.events.emit(SyncEvent::ChatsUpdated(chats.clone()));
        Ok(chats)
    }

    pub async fn mark_chat_read(&self, chat_id: &ChatId) -> Result<usize> {
        let changed = self.db.lock().await.mark_chat_read(chat_id, &self.user.id)?;
        if changed > 0 {
            emit_messages(&self.db, &self.events, chat_id).await;
        }
        Ok(changed)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    pub async fn send_message(&self, chat_id: &ChatId, content: &str) -> Result<PendingSend> {
        self.outbox
            .send_message_with_sync(chat_id, &self.user, content)
            .await
    }

    pub async fn drain_queue(&self) -> Result<DrainReport> {
        self.outbox.drain_queue().await
    }

    /// Register a new session and return the payload to show as a QR code.
    pub async fn create_session(&self) -> Result<SessionJoinPayload> {
        let payload = SessionJoinPayload::create(&self.user);
        with_timeout(
            self.config.remote_timeout,
            self.remote.create_session(&payload.session_id, &self.user),
        )
        .await?;
        tracing::info!(session = %payload.session_id, "session created");
        Ok(payload)
    }

    /// Join the session behind a scanned or typed payload.
    pub async fn join_session(&self, input: &str) -> Result<Chat> {
        let payload = SessionJoinPayload::parse(input)?;
        if payload.creator_id.as_deref() == Some(self.user.id.as_str()) {
            return Err(RemoteError::SelfJoin.into());
        }

        let remote_chat = with_timeout(
            self.config.remote_timeout,
            self.remote.join_session(&payload, &self.user),
        )
        .await?;

        let chat = chat_from_remote(&remote_chat)?;
        let stored = self.db.lock().await.save_chat(&chat)?;
        emit_chats(&self.db, &self.events).await;

        tracing::info!(session = %payload.session_id, chat = %stored.id, "session joined");
        Ok(stored)
    }

    /// Leave a chat for both parties.
    pub async fn leave_chat(&self, chat_id: &ChatId) -> Result<()> {
        with_timeout(
            self.config.remote_timeout,
            self.remote.leave_chat(chat_id, &self.user.id),
        )
        .await?;

        if self.current_chat().await.as_ref() == Some(chat_id) {
            self.close_chat().await;
        }
        self.db.lock().await.deactivate_chat(chat_id)?;
        emit_chats(&self.db, &self.events).await;

        tracing::info!(chat = %chat_id, "left chat");
        Ok(())
    }

    /// Stop every subscription and background task.
    pub async fn shutdown(self) {
        self.close_chat().await;
        if let Some(subscription) = self.chat_subscription.lock().await.take() {
            subscription.shutdown().await;
        }
        self.connectivity_task.abort();
        tracing::info!(user = %self.user.id, "sync service stopped");
    }
}

// ---------------------------------------------------------------------------
// Feeds
// ---------------------------------------------------------------------------

struct ChatFeed {
    remote: Arc<dyn RemoteSyncSource>,
    user_id: UserId,
    reconciler: Arc<Reconciler>,
    db: SharedDatabase,
    events: EventSink,
    config: SyncConfig,
}

#[async_trait]
impl SnapshotFeed for ChatFeed {
    type Record = RemoteChat;

    async fn subscribe(&mut self) -> std::result::Result<SnapshotStream<RemoteChat>, RemoteError> {
        with_timeout(
            self.config.remote_timeout,
            self.remote.subscribe_to_user_chats(&self.user_id),
        )
        .await
    }

    async fn apply(&mut self, snapshot: Vec<RemoteChat>, state: SubscriptionState) {
        self.reconciler.apply_chat_snapshot(&snapshot, state).await;
        emit_chats(&self.db, &self.events).await;
    }

    async fn report_error(&mut self, error: &RemoteError) {
        self.events.emit(SyncEvent::SubscriptionError {
            scope: "chats".to_string(),
            error: error.clone(),
        });
    }
}

struct MessageFeed {
    remote: Arc<dyn RemoteSyncSource>,
    chat_id: ChatId,
    user_id: UserId,
    reconciler: Arc<Reconciler>,
    gate: Arc<NotificationGate>,
    db: SharedDatabase,
    events: EventSink,
    config: SyncConfig,
}

#[async_trait]
impl SnapshotFeed for MessageFeed {
    type Record = RemoteMessage;

    async fn subscribe(
        &mut self,
    ) -> std::result::Result<SnapshotStream<RemoteMessage>, RemoteError> {
        with_timeout(
            self.config.remote_timeout,
            self.remote.subscribe_to_messages(&self.chat_id),
        )
        .await
    }

    async fn apply(&mut self, snapshot: Vec<RemoteMessage>, state: SubscriptionState) {
        self.reconciler
            .apply_message_snapshot(&self.chat_id, &snapshot, state)
            .await;
        if self.gate.is_watched(&self.chat_id) {
            if let Err(e) = self.db.lock().await.mark_chat_read(&self.chat_id, &self.user_id) {
                tracing::warn!(chat = %self.chat_id, error = %e, "failed to mark chat read");
            }
        }
        emit_messages(&self.db, &self.events, &self.chat_id).await;
    }

    async fn report_error(&mut self, error: &RemoteError) {
        self.events.emit(SyncEvent::SubscriptionError {
            scope: format!("messages:{}", self.chat_id),
            error: error.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn emit_chats(db: &SharedDatabase, events: &EventSink) {
    let chats = db.lock().await.get_all_chats();
    match chats {
        Ok(chats) => events.emit(SyncEvent::ChatsUpdated(chats)),
        Err(e) => tracing::warn!(error = %e, "failed to reload chats"),
    }
}

async fn emit_messages(db: &SharedDatabase, events: &EventSink, chat_id: &ChatId) {
    let messages = db.lock().await.get_messages_for_chat(chat_id);
    match messages {
        Ok(messages) => events.emit(SyncEvent::MessagesUpdated {
            chat_id: chat_id.clone(),
            messages,
        }),
        Err(e) => tracing::warn!(chat = %chat_id, error = %e, "failed to reload messages"),
    }
}

/// Drains the queue at startup (if online) and on every offline -> online edge.
async fn watch_connectivity(
    mut watcher: ConnectivityWatcher,
    outbox: OfflineSendQueue,
    events: EventSink,
) {
    if watcher.is_online() {
        drain(&outbox).await;
    }
    while let Some(edge) = watcher.next_edge().await {
        events.emit(SyncEvent::ConnectivityChanged {
            online: edge.is_online(),
        });
        if edge == ConnectivityEdge::WentOnline {
            drain(&outbox).await;
        }
    }
    tracing::debug!("connectivity source closed");
}

async fn drain(outbox: &OfflineSendQueue) {
    if let Err(e) = outbox.drain_queue().await {
        tracing::warn!(error = %e, "queue drain failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pairchat_store::{Database, MessageStatus};

    use crate::connectivity::ManualConnectivity;
    use crate::memory::MemoryRemote;
    use crate::outbox::DeliveryOutcome;
    use crate::share;
    use crate::test_support::{alice, bob, RecordingNotifier};

    struct Client {
        service: SyncService,
        events: mpsc::Receiver<SyncEvent>,
        notifier: Arc<RecordingNotifier>,
        net: ManualConnectivity,
    }

    async fn client(remote: &MemoryRemote, user: LocalUser) -> Client {
        let db = share(Database::open_in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let net = ManualConnectivity::new(true);
        let config = SyncConfig {
            resubscribe_backoff_min: Duration::from_millis(10),
            resubscribe_backoff_max: Duration::from_millis(50),
            ..SyncConfig::default()
        };
        let (service, events) = SyncService::start(
            db,
            Arc::new(remote.clone()),
            notifier.clone(),
            net.watcher(),
            user,
            config,
        )
        .await;
        Client {
            service,
            events,
            notifier,
            net,
        }
    }

    /// Receive events until one matches.
    async fn wait_for<F>(rx: &mut mpsc::Receiver<SyncEvent>, mut pred: F) -> SyncEvent
    where
        F: FnMut(&SyncEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn chats_len(n: usize) -> impl FnMut(&SyncEvent) -> bool {
        move |e| matches!(e, SyncEvent::ChatsUpdated(chats) if chats.len() == n)
    }

    /// Alice creates a session, Bob joins it; both see the chat.
    async fn paired() -> (MemoryRemote, Client, Client, ChatId) {
        let remote = MemoryRemote::new();
        let mut a = client(&remote, alice()).await;
        let mut b = client(&remote, bob()).await;

        let payload = a.service.create_session().await.unwrap();
        let chat = b.service.join_session(&payload.encode()).await.unwrap();

        wait_for(&mut a.events, chats_len(1)).await;
        wait_for(&mut b.events, chats_len(1)).await;
        (remote, a, b, chat.id)
    }

    #[tokio::test]
    async fn test_new_message_notifies_once_end_to_end() {
        let (remote, mut a, b, chat_id) = paired().await;

        let pending = b.service.send_message(&chat_id, "hi").await.unwrap();
        assert_eq!(pending.outcome().await.unwrap(), DeliveryOutcome::Sent);

        let fired = wait_for(&mut a.events, |e| matches!(e, SyncEvent::NotificationFired(_))).await;
        let SyncEvent::NotificationFired(request) = fired else {
            unreachable!()
        };
        assert_eq!(request.title, "Bob");
        assert_eq!(request.body, "hi");
        assert_eq!(request.payload.chat_id, chat_id);

        // A flaky backend re-sends the same state.
        remote.redeliver();
        wait_for(&mut a.events, chats_len(1)).await;
        remote.redeliver();
        wait_for(&mut a.events, chats_len(1)).await;

        assert_eq!(a.notifier.count(), 1);
        assert_eq!(b.notifier.count(), 0, "own messages never notify");
    }

    #[tokio::test]
    async fn test_open_chat_suppresses_and_marks_read() {
        let (_remote, mut a, b, chat_id) = paired().await;
        a.service.open_chat(&chat_id).await.unwrap();
        assert!(a.service.gate().is_watched(&chat_id));

        b.service
            .send_message(&chat_id, "are you there?")
            .await
            .unwrap()
            .outcome()
            .await
            .unwrap();

        let event = wait_for(&mut a.events, |e| {
            matches!(e, SyncEvent::MessagesUpdated { messages, .. } if messages.len() == 1)
        })
        .await;
        let SyncEvent::MessagesUpdated { messages, .. } = event else {
            unreachable!()
        };
        assert_eq!(messages[0].status, MessageStatus::Read);
        assert_eq!(a.notifier.count(), 0);

        a.service.close_chat().await;
        assert!(a.service.current_chat().await.is_none());
        assert!(!a.service.gate().is_watched(&chat_id));
    }

    #[tokio::test]
    async fn test_closed_chat_stops_following_and_notifies_again() {
        let (_remote, mut a, b, chat_id) = paired().await;
        a.service.open_chat(&chat_id).await.unwrap();

        a.service.close_chat().await;
        assert!(a.service.gate().current_chat().is_none());
        while a.events.try_recv().is_ok() {}

        b.service
            .send_message(&chat_id, "still there?")
            .await
            .unwrap()
            .outcome()
            .await
            .unwrap();

        let mut followed = false;
        wait_for(&mut a.events, |e| {
            followed |= matches!(e, SyncEvent::MessagesUpdated { .. });
            matches!(e, SyncEvent::NotificationFired(_))
        })
        .await;
        assert!(!followed, "closed chat must not be followed");
        assert_eq!(a.notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_offline_send_drains_on_reconnect_edge() {
        let (remote, mut a, mut b, chat_id) = paired().await;

        remote.set_online(false);
        a.net.set_online(false);
        let pending = a.service.send_message(&chat_id, "later").await.unwrap();
        assert!(!pending.is_attempting());
        let id = pending.message.id.clone();
        assert_eq!(
            a.service.messages(&chat_id).await.unwrap()[0].status,
            MessageStatus::Failed
        );

        remote.set_online(true);
        a.net.set_online(true);
        let drained = wait_for(&mut a.events, |e| {
            matches!(e, SyncEvent::QueueDrained(report) if !report.sent.is_empty())
        })
        .await;
        let SyncEvent::QueueDrained(report) = drained else {
            unreachable!()
        };
        assert_eq!(report.sent, vec![id.clone()]);
        assert_eq!(report.remaining, 0);

        let stored = a.service.messages(&chat_id).await.unwrap();
        assert_eq!(stored[0].status, MessageStatus::Sent);

        wait_for(&mut b.events, |e| matches!(e, SyncEvent::NotificationFired(_))).await;
    }

    #[tokio::test]
    async fn test_leave_chat_removes_it_for_both() {
        let (_remote, mut a, mut b, chat_id) = paired().await;

        a.service.leave_chat(&chat_id).await.unwrap();

        assert!(a.service.chats().await.unwrap().is_empty());
        wait_for(&mut b.events, chats_len(0)).await;
        assert!(b.service.messages(&chat_id).await.unwrap().is_empty());
        wait_for(&mut a.events, chats_len(0)).await;
    }

    #[tokio::test]
    async fn test_session_errors_surface() {
        let remote = MemoryRemote::new();
        let a = client(&remote, alice()).await;
        let b = client(&remote, bob()).await;

        let payload = a.service.create_session().await.unwrap();
        assert!(matches!(
            a.service.join_session(&payload.encode()).await,
            Err(SyncError::Remote(RemoteError::SelfJoin))
        ));
        assert!(matches!(
            b.service.join_session("unknown-session").await,
            Err(SyncError::Remote(RemoteError::SessionNotFound(_)))
        ));
        assert!(matches!(
            b.service.join_session("   ").await,
            Err(SyncError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_subscription_recovers_after_stream_loss() {
        let (remote, mut a, b, chat_id) = paired().await;

        remote.inject_error(RemoteError::Unavailable("blip".into()));
        wait_for(&mut a.events, |e| matches!(e, SyncEvent::SubscriptionError { .. })).await;
        remote.disconnect_subscribers();

        // Wait for the resubscribe baseline before sending.
        wait_for(&mut a.events, chats_len(1)).await;
        b.service
            .send_message(&chat_id, "after reconnect")
            .await
            .unwrap()
            .outcome()
            .await
            .unwrap();

        wait_for(&mut a.events, |e| matches!(e, SyncEvent::NotificationFired(_))).await;
        assert_eq!(a.notifier.count(), 1);
        a.service.shutdown().await;
    }
}
