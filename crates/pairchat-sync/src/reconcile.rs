//! Merging remote snapshots into the local cache.
//!
//! Every snapshot carries the complete remote state, so the local side is
//! converged by set difference: chats missing from the snapshot are deleted
//! first, then every remote chat is upserted. New-message candidates are
//! computed against the cache *before* it is touched, and only fire once the
//! subscription has left its baseline state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use pairchat_shared::protocol::{RemoteChat, RemoteMessage};
use pairchat_shared::{ChatId, UserId};
use pairchat_store::{Chat, Message, MessageStatus};

use crate::config::SyncConfig;
use crate::convert::{chat_from_remote, message_from_remote};
use crate::events::{EventSink, SyncEvent};
use crate::notify::{NotificationGate, NotificationRequest, Notifier};
use crate::subscription::SubscriptionState;
use crate::SharedDatabase;

/// A message that arrived from someone else and was not seen before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of applying one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Records skipped because they could not be parsed or written.
    pub failed: usize,
    /// Candidates that went to the gate (empty for a baseline snapshot).
    pub candidates: Vec<NewMessage>,
    /// Candidates withheld because the snapshot was a baseline.
    pub suppressed: usize,
    pub notified: usize,
    pub baseline: bool,
}

pub struct Reconciler {
    db: SharedDatabase,
    gate: Arc<NotificationGate>,
    notifier: Arc<dyn Notifier>,
    events: EventSink,
    local_user: UserId,
    body_chars: usize,
}

impl Reconciler {
    pub fn new(
        db: SharedDatabase,
        gate: Arc<NotificationGate>,
        notifier: Arc<dyn Notifier>,
        local_user: UserId,
        config: &SyncConfig,
    ) -> Self {
        Self {
            db,
            gate,
            notifier,
            events: EventSink::disabled(),
            local_user,
            body_chars: config.notification_body_chars,
        }
    }

    /// Also report fired notifications on `events`.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn gate(&self) -> &Arc<NotificationGate> {
        &self.gate
    }

    /// Converge the cached chat list onto a full remote chat-list snapshot.
    pub async fn apply_chat_snapshot(
        &self,
        snapshot: &[RemoteChat],
        state: SubscriptionState,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            baseline: state.is_baseline(),
            ..ReconcileReport::default()
        };

        // Inactive records count as absent. Unparseable ones still count as
        // present so their cached copy survives.
        let mut remote_ids = HashSet::new();
        let mut incoming = Vec::with_capacity(snapshot.len());
        for remote in snapshot.iter().filter(|c| c.is_active) {
            remote_ids.insert(ChatId::from(remote.id.as_str()));
            match chat_from_remote(remote) {
                Ok(chat) => incoming.push(chat),
                Err(e) => {
                    tracing::warn!(chat = %remote.id, error = %e, "skipping unparseable chat");
                    report.failed += 1;
                }
            }
        }

        let mut candidates = Vec::new();
        {
            let db = self.db.lock().await;

            let local_active = match db.active_chat_ids() {
                Ok(ids) => ids,
                Err(e) => {
                    tracing::error!(error = %e, "cannot read cached chats, snapshot ignored");
                    report.failed += incoming.len();
                    return report;
                }
            };

            for stale in local_active.difference(&remote_ids) {
                match db.delete_chat(stale) {
                    Ok(_) => report.deleted += 1,
                    Err(e) => {
                        tracing::warn!(chat = %stale, error = %e, "failed to delete chat");
                        report.failed += 1;
                    }
                }
            }

            for chat in &incoming {
                let previous = match db.find_chat(&chat.id) {
                    Ok(previous) => previous,
                    Err(e) => {
                        tracing::warn!(chat = %chat.id, error = %e, "failed to read cached chat");
                        report.failed += 1;
                        continue;
                    }
                };
                let candidate = self.chat_candidate(previous.as_ref(), chat);

                match db.save_chat(chat) {
                    Ok(_) => {
                        if previous.is_some() {
                            report.updated += 1;
                        } else {
                            report.created += 1;
                        }
                        candidates.extend(candidate);
                    }
                    Err(e) => {
                        tracing::warn!(chat = %chat.id, error = %e, "failed to save chat");
                        report.failed += 1;
                    }
                }
            }
        }

        if state.is_baseline() {
            for chat in &incoming {
                if let Some(lm) = &chat.last_message {
                    self.gate.update_last_message_time(&chat.id, lm.timestamp);
                }
            }
        }
        self.dispatch(candidates, state, &mut report);

        tracing::debug!(
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            failed = report.failed,
            notified = report.notified,
            baseline = report.baseline,
            "chat snapshot applied"
        );
        report
    }

    /// Merge a full message snapshot of one chat into the cache.
    ///
    /// Local rows absent from the snapshot (unsent messages) are kept, and
    /// delivery receipts recorded locally are never rolled back.
    pub async fn apply_message_snapshot(
        &self,
        chat_id: &ChatId,
        snapshot: &[RemoteMessage],
        state: SubscriptionState,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            baseline: state.is_baseline(),
            ..ReconcileReport::default()
        };

        let mut incoming: Vec<Message> = Vec::with_capacity(snapshot.len());
        for remote in snapshot {
            if remote.chat_id != chat_id.as_str() {
                tracing::warn!(chat = %chat_id, message = %remote.id, "message belongs to another chat");
                report.failed += 1;
                continue;
            }
            match message_from_remote(remote, MessageStatus::Sent) {
                Ok(message) => incoming.push(message),
                Err(e) => {
                    tracing::warn!(message = %remote.id, error = %e, "skipping unparseable message");
                    report.failed += 1;
                }
            }
        }

        let mut candidates = Vec::new();
        {
            let db = self.db.lock().await;

            let chat = match db.find_chat(chat_id) {
                Ok(Some(chat)) => chat,
                Ok(None) => {
                    tracing::warn!(chat = %chat_id, "messages for a chat not in the cache");
                    report.failed += incoming.len();
                    return report;
                }
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "failed to read cached chat");
                    report.failed += incoming.len();
                    return report;
                }
            };
            let previous_newest = match db.latest_message_timestamp(chat_id) {
                Ok(ts) => ts,
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "failed to read newest message");
                    report.failed += incoming.len();
                    return report;
                }
            };

            let mut created = 0;
            for message in &mut incoming {
                match db.find_message(&message.id) {
                    Ok(Some(local)) => message.status = merge_status(local.status),
                    Ok(None) => {
                        created += 1;
                        let newer = previous_newest.map_or(true, |p| message.timestamp > p);
                        if newer && message.sender_id != self.local_user {
                            candidates.push(NewMessage {
                                chat_id: chat_id.clone(),
                                sender_id: message.sender_id.clone(),
                                sender_name: display_name(&chat, message),
                                content: message.content.clone(),
                                timestamp: message.timestamp,
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!(message = %message.id, error = %e, "failed to read cached message");
                    }
                }
            }

            match db.save_messages(&incoming) {
                Ok(_) => {
                    report.created = created;
                    report.updated = incoming.len() - created;
                }
                Err(e) => {
                    tracing::warn!(chat = %chat_id, error = %e, "failed to save message snapshot");
                    report.failed += incoming.len();
                    candidates.clear();
                }
            }
        }

        if state.is_baseline() {
            if let Some(newest) = incoming.iter().map(|m| m.timestamp).max() {
                self.gate.update_last_message_time(chat_id, newest);
            }
        }
        candidates.sort_by_key(|c| c.timestamp);
        self.dispatch(candidates, state, &mut report);

        tracing::debug!(
            chat = %chat_id,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            notified = report.notified,
            baseline = report.baseline,
            "message snapshot applied"
        );
        report
    }

    fn chat_candidate(&self, previous: Option<&Chat>, chat: &Chat) -> Option<NewMessage> {
        let lm = chat.last_message.as_ref()?;
        if lm.sender_id == self.local_user {
            return None;
        }
        let known = previous.and_then(|p| p.last_message.as_ref());
        if known.is_some_and(|k| lm.timestamp <= k.timestamp) {
            return None;
        }
        Some(NewMessage {
            chat_id: chat.id.clone(),
            sender_id: lm.sender_id.clone(),
            sender_name: chat
                .name_of(&lm.sender_id)
                .unwrap_or_else(|| lm.sender_id.short())
                .to_string(),
            content: lm.content.clone(),
            timestamp: lm.timestamp,
        })
    }

    fn dispatch(
        &self,
        candidates: Vec<NewMessage>,
        state: SubscriptionState,
        report: &mut ReconcileReport,
    ) {
        if state.is_baseline() {
            report.suppressed = candidates.len();
            return;
        }

        for candidate in candidates {
            if self.gate.try_claim(&candidate.chat_id, candidate.timestamp) {
                let request = NotificationRequest::new(
                    candidate.chat_id.clone(),
                    &candidate.sender_name,
                    &candidate.content,
                    self.body_chars,
                );
                tracing::info!(chat = %candidate.chat_id, sender = %candidate.sender_id, "new message notification");
                self.notifier.notify(request.clone());
                self.events.emit(SyncEvent::NotificationFired(request));
                report.notified += 1;
            }
            report.candidates.push(candidate);
        }
    }
}

/// Status to store for a message the remote has: the remote only proves the
/// write happened, so receipts recorded locally win.
fn merge_status(local: MessageStatus) -> MessageStatus {
    if local.is_receipt() {
        local
    } else {
        MessageStatus::Sent
    }
}

fn display_name(chat: &Chat, message: &Message) -> String {
    if !message.sender_name.trim().is_empty() {
        return message.sender_name.clone();
    }
    chat.name_of(&message.sender_id)
        .unwrap_or_else(|| message.sender_id.short())
        .to_string()
}
