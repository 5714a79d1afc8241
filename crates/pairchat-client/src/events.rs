//! Sync events mapped to named UI events with camelCase JSON payloads.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pairchat_shared::UserId;
use pairchat_sync::{NotificationRequest, SyncEvent};

use crate::commands::chats::{self, ChatDto};
use crate::commands::messaging::{self, DrainReportDto, MessageDto};
use crate::error::is_blocking_remote;

pub const EVENT_CHATS_UPDATED: &str = "chats-updated";
pub const EVENT_MESSAGES_UPDATED: &str = "messages-updated";
pub const EVENT_NOTIFICATION: &str = "notification";
pub const EVENT_QUEUE_DRAINED: &str = "queue-drained";
pub const EVENT_CONNECTIVITY_CHANGED: &str = "connectivity-changed";
pub const EVENT_SYNC_ERROR: &str = "sync-error";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatsPayload {
    pub chats: Vec<ChatDto>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesPayload {
    pub chat_id: String,
    pub messages: Vec<MessageDto>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectivityPayload {
    pub online: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorPayload {
    pub scope: String,
    pub message: String,
    /// The user has to act; retrying will not help.
    pub blocking: bool,
}

/// A named event ready for the UI bridge.
#[derive(Debug, Clone, Serialize)]
pub struct UiEvent {
    pub name: &'static str,
    pub payload: serde_json::Value,
}

fn ui_event<S: Serialize>(name: &'static str, payload: S) -> serde_json::Result<UiEvent> {
    Ok(UiEvent {
        name,
        payload: serde_json::to_value(payload)?,
    })
}

pub fn to_ui_event(event: SyncEvent, me: &UserId) -> serde_json::Result<UiEvent> {
    match event {
        SyncEvent::ChatsUpdated(list) => ui_event(
            EVENT_CHATS_UPDATED,
            ChatsPayload {
                chats: chats::to_dtos(list, me),
            },
        ),
        SyncEvent::MessagesUpdated { chat_id, messages } => ui_event(
            EVENT_MESSAGES_UPDATED,
            MessagesPayload {
                chat_id: chat_id.to_string(),
                messages: messaging::to_dtos(messages, me),
            },
        ),
        SyncEvent::NotificationFired(request) => {
            ui_event::<NotificationRequest>(EVENT_NOTIFICATION, request)
        }
        SyncEvent::QueueDrained(report) => {
            ui_event(EVENT_QUEUE_DRAINED, DrainReportDto::from(report))
        }
        SyncEvent::ConnectivityChanged { online } => {
            ui_event(EVENT_CONNECTIVITY_CHANGED, ConnectivityPayload { online })
        }
        SyncEvent::SubscriptionError { scope, error } => ui_event(
            EVENT_SYNC_ERROR,
            SyncErrorPayload {
                scope,
                blocking: is_blocking_remote(&error),
                message: error.to_string(),
            },
        ),
    }
}

/// Map every sync event for `me` and push it to `out` until either side
/// closes.
pub fn forward_events(
    mut rx: mpsc::Receiver<SyncEvent>,
    me: UserId,
    out: mpsc::Sender<UiEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let ui = match to_ui_event(event, &me) {
                Ok(ui) => ui,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to encode event");
                    continue;
                }
            };
            if out.send(ui).await.is_err() {
                tracing::debug!("UI event receiver gone");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::ChatId;
    use pairchat_sync::{DrainReport, RemoteError};

    fn me() -> UserId {
        UserId::from("u1")
    }

    #[test]
    fn test_notification_payload_shape() {
        let request = NotificationRequest::new(ChatId::from("c1"), "Bob", "hi", 50);
        let ui = to_ui_event(SyncEvent::NotificationFired(request), &me()).unwrap();
        assert_eq!(ui.name, EVENT_NOTIFICATION);
        assert_eq!(ui.payload["title"], "Bob");
        assert_eq!(ui.payload["body"], "hi");
        assert_eq!(ui.payload["payload"]["chatId"], "c1");
    }

    #[test]
    fn test_drain_and_error_payloads() {
        let report = DrainReport {
            sent: vec!["m1".into()],
            stopped_on: Some(RemoteError::Unavailable("down".into())),
            remaining: 2,
            ..DrainReport::default()
        };
        let ui = to_ui_event(SyncEvent::QueueDrained(report), &me()).unwrap();
        assert_eq!(ui.name, EVENT_QUEUE_DRAINED);
        assert_eq!(ui.payload["sent"][0], "m1");
        assert_eq!(ui.payload["remaining"], 2);
        assert!(ui.payload["stoppedOn"].is_string());

        let ui = to_ui_event(
            SyncEvent::SubscriptionError {
                scope: "chats".into(),
                error: RemoteError::SessionNotFound("s".into()),
            },
            &me(),
        )
        .unwrap();
        assert_eq!(ui.name, EVENT_SYNC_ERROR);
        assert_eq!(ui.payload["blocking"], true);
    }

    #[tokio::test]
    async fn test_forwarder_maps_and_stops() {
        let (tx, rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let task = forward_events(rx, me(), out_tx);

        tx.send(SyncEvent::ConnectivityChanged { online: true })
            .await
            .unwrap();
        let ui = out_rx.recv().await.unwrap();
        assert_eq!(ui.name, EVENT_CONNECTIVITY_CHANGED);
        assert_eq!(ui.payload["online"], true);

        drop(tx);
        task.await.unwrap();
    }
}
