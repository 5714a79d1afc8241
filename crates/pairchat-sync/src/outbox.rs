//! Optimistic sends with a durable retry queue.
//!
//! A message is written to the cache before any network round trip. Online,
//! the remote write runs in the background; offline, or when that write
//! fails, a queue entry carrying the full message is stored alongside it.
//! [`OfflineSendQueue::drain_queue`] replays the queue oldest-first when
//! connectivity comes back.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use pairchat_shared::constants::MAX_CONTENT_CHARS;
use pairchat_shared::{ChatId, LocalUser, MessageId};
use pairchat_store::{Message, MessageStatus, StoreError};

use crate::config::SyncConfig;
use crate::connectivity::ConnectivityWatcher;
use crate::convert::message_to_remote;
use crate::error::{RemoteError, Result, SyncError};
use crate::events::{EventSink, SyncEvent};
use crate::remote::{with_timeout, RemoteSyncSource};
use crate::SharedDatabase;

/// How the first delivery attempt of a message ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The remote acknowledged the write.
    Sent,
    /// The write failed and the message is queued for replay.
    Queued(RemoteError),
    /// The device was offline; nothing was attempted.
    Offline,
}

/// A message that has been written locally, plus its delivery attempt.
#[derive(Debug)]
pub struct PendingSend {
    pub message: Message,
    delivery: Option<JoinHandle<Result<DeliveryOutcome>>>,
}

impl PendingSend {
    /// Whether a remote attempt is in flight.
    pub fn is_attempting(&self) -> bool {
        self.delivery.is_some()
    }

    /// Wait for the delivery attempt to finish.
    pub async fn outcome(self) -> Result<DeliveryOutcome> {
        match self.delivery {
            None => Ok(DeliveryOutcome::Offline),
            Some(handle) => handle
                .await
                .map_err(|e| SyncError::Task(e.to_string()))?,
        }
    }
}

/// Result of one queue drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub sent: Vec<MessageId>,
    /// Messages given up on; they stay `failed`.
    pub abandoned: Vec<MessageId>,
    /// The transient error that ended the drain early, if any.
    pub stopped_on: Option<RemoteError>,
    /// Entries still queued afterwards.
    pub remaining: usize,
}

#[derive(Clone)]
pub struct OfflineSendQueue {
    inner: Arc<Inner>,
}

struct Inner {
    db: SharedDatabase,
    remote: Arc<dyn RemoteSyncSource>,
    connectivity: ConnectivityWatcher,
    config: SyncConfig,
    events: EventSink,
    drain_lock: Mutex<()>,
}

impl OfflineSendQueue {
    pub fn new(
        db: SharedDatabase,
        remote: Arc<dyn RemoteSyncSource>,
        connectivity: ConnectivityWatcher,
        config: SyncConfig,
        events: EventSink,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                remote,
                connectivity,
                config,
                events,
                drain_lock: Mutex::new(()),
            }),
        }
    }

    /// Write a new text message locally and start delivering it.
    ///
    /// Returns once the local write is committed; the remote attempt (if the
    /// device is online) continues in the background.
    pub async fn send_message_with_sync(
        &self,
        chat_id: &ChatId,
        sender: &LocalUser,
        content: &str,
    ) -> Result<PendingSend> {
        let content = validate_content(content)?;
        let online = self.inner.connectivity.is_online();

        let message = {
            let db = self.inner.db.lock().await;
            let chat = match db.find_chat(chat_id)? {
                Some(chat) => chat,
                None => return Err(SyncError::UnknownChat(chat_id.clone())),
            };
            if !chat.is_active {
                return Err(SyncError::ChatInactive(chat_id.clone()));
            }
            if !chat.has_participant(&sender.id) {
                return Err(SyncError::NotParticipant {
                    chat: chat_id.clone(),
                    user: sender.id.clone(),
                });
            }

            let status = if online {
                MessageStatus::Sending
            } else {
                MessageStatus::Failed
            };
            let message = Message::new_text(
                chat_id.clone(),
                sender.id.clone(),
                sender.display_name.clone(),
                content,
                status,
            );
            if online {
                db.save_message(&message)?;
            } else {
                db.save_message_with_sync_entry(&message)?;
            }
            message
        };

        tracing::debug!(chat = %chat_id, message = %message.id, online, "message stored locally");
        self.emit_messages(chat_id).await;

        let delivery = if online {
            let queue = self.clone();
            let pending = message.clone();
            Some(tokio::spawn(async move { queue.deliver(pending).await }))
        } else {
            None
        };

        Ok(PendingSend { message, delivery })
    }

    /// First remote attempt for a message that is already stored.
    ///
    /// Older queued writes are replayed first. If they cannot all be sent,
    /// the message joins the queue behind them instead of overtaking them.
    pub async fn deliver(&self, message: Message) -> Result<DeliveryOutcome> {
        if self.inner.db.lock().await.sync_queue_len()? > 0 {
            let report = self.drain_queue().await?;
            if report.remaining > 0 {
                let reason = report.stopped_on.unwrap_or_else(|| {
                    RemoteError::Unavailable("earlier messages still queued".into())
                });
                tracing::debug!(message = %message.id, waiting = report.remaining, "queued behind earlier messages");
                self.inner
                    .db
                    .lock()
                    .await
                    .fail_message_and_enqueue(&message)?;
                self.emit_messages(&message.chat_id).await;
                return Ok(DeliveryOutcome::Queued(reason));
            }
        }

        let wire = message_to_remote(&message);
        let attempt = with_timeout(
            self.inner.config.remote_timeout,
            self.inner.remote.send_message(&wire),
        )
        .await;

        let outcome = match attempt {
            Ok(()) => {
                self.inner.db.lock().await.confirm_message_sent(&message.id)?;
                tracing::debug!(message = %message.id, "message sent");
                DeliveryOutcome::Sent
            }
            Err(e) => {
                tracing::warn!(message = %message.id, error = %e, "send failed, queued for retry");
                self.inner
                    .db
                    .lock()
                    .await
                    .fail_message_and_enqueue(&message)?;
                DeliveryOutcome::Queued(e)
            }
        };

        self.emit_messages(&message.chat_id).await;
        Ok(outcome)
    }

    /// Replay queued writes oldest-first.
    ///
    /// Stops at the first transient failure so later messages never overtake
    /// earlier ones. Concurrent calls run one after another.
    pub async fn drain_queue(&self) -> Result<DrainReport> {
        let _guard = self.inner.drain_lock.lock().await;

        let entries = self.inner.db.lock().await.pending_sync_entries()?;
        let mut report = DrainReport::default();
        let mut touched: Vec<ChatId> = Vec::new();

        if !entries.is_empty() {
            tracing::info!(pending = entries.len(), "draining send queue");
        }

        for entry in entries {
            let message_id = MessageId::from(entry.record_id.as_str());
            let message = match entry.message() {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(entry = %entry.id, error = %e, "undecodable queue entry dropped");
                    self.inner
                        .db
                        .lock()
                        .await
                        .abandon_sync_entry(&entry.id, &message_id)?;
                    report.abandoned.push(message_id);
                    continue;
                }
            };
            if !touched.contains(&message.chat_id) {
                touched.push(message.chat_id.clone());
            }

            let attempt = with_timeout(
                self.inner.config.remote_timeout,
                self.inner.remote.send_message(&message_to_remote(&message)),
            )
            .await;

            let db = self.inner.db.lock().await;
            match attempt {
                Ok(()) => {
                    db.complete_sync_entry(&entry.id, &message.id)?;
                    report.sent.push(message.id);
                }
                Err(e) if e.is_transient() => {
                    let retries = match db.bump_retry_count(&entry.id) {
                        Ok(n) => n,
                        // Removed underneath us (chat deleted).
                        Err(StoreError::NotFound) => continue,
                        Err(other) => return Err(other.into()),
                    };
                    if retries >= self.inner.config.retry_ceiling {
                        db.abandon_sync_entry(&entry.id, &message.id)?;
                        report.abandoned.push(message.id.clone());
                    }
                    tracing::warn!(message = %message.id, retries, error = %e, "queued send failed, drain stopped");
                    report.stopped_on = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(message = %message.id, error = %e, "queued send rejected");
                    db.abandon_sync_entry(&entry.id, &message.id)?;
                    report.abandoned.push(message.id);
                }
            }
        }

        report.remaining = self.inner.db.lock().await.sync_queue_len()?;
        for chat_id in &touched {
            self.emit_messages(chat_id).await;
        }
        tracing::info!(
            sent = report.sent.len(),
            abandoned = report.abandoned.len(),
            remaining = report.remaining,
            "send queue drained"
        );
        self.inner
            .events
            .emit(SyncEvent::QueueDrained(report.clone()));
        Ok(report)
    }

    async fn emit_messages(&self, chat_id: &ChatId) {
        let messages = self.inner.db.lock().await.get_messages_for_chat(chat_id);
        match messages {
            Ok(messages) => self.inner.events.emit(SyncEvent::MessagesUpdated {
                chat_id: chat_id.clone(),
                messages,
            }),
            Err(e) => tracing::warn!(chat = %chat_id, error = %e, "failed to reload messages"),
        }
    }
}

fn validate_content(content: &str) -> Result<&str> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(SyncError::EmptyContent);
    }
    let len = trimmed.chars().count();
    if len > MAX_CONTENT_CHARS {
        return Err(SyncError::ContentTooLong {
            len,
            max: MAX_CONTENT_CHARS,
        });
    }
    Ok(trimmed)
}
