use serde::Serialize;
use tracing::info;

use pairchat_shared::UserId;
use pairchat_store::Message;
use pairchat_sync::DrainReport;

use crate::commands::parse_chat_id;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub message_type: String,
    /// `sending`, `sent`, `delivered`, `read` or `failed`.
    pub status: String,
    pub from_me: bool,
}

impl MessageDto {
    pub fn from_message(m: Message, me: &UserId) -> Self {
        Self {
            from_me: &m.sender_id == me,
            id: m.id.to_string(),
            chat_id: m.chat_id.to_string(),
            sender_id: m.sender_id.to_string(),
            sender_name: m.sender_name,
            content: m.content,
            timestamp: m.timestamp.to_rfc3339(),
            message_type: m.message_type.as_str().to_string(),
            status: m.status.as_str().to_string(),
        }
    }
}

pub(crate) fn to_dtos(messages: Vec<Message>, me: &UserId) -> Vec<MessageDto> {
    messages
        .into_iter()
        .map(|m| MessageDto::from_message(m, me))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReportDto {
    pub sent: Vec<String>,
    pub abandoned: Vec<String>,
    pub stopped_on: Option<String>,
    pub remaining: usize,
}

impl From<DrainReport> for DrainReportDto {
    fn from(r: DrainReport) -> Self {
        Self {
            sent: r.sent.iter().map(|id| id.to_string()).collect(),
            abandoned: r.abandoned.iter().map(|id| id.to_string()).collect(),
            stopped_on: r.stopped_on.map(|e| e.to_string()),
            remaining: r.remaining,
        }
    }
}

/// Cached messages of a chat, oldest first.
pub async fn get_messages(state: &AppState, chat_id: String) -> Result<Vec<MessageDto>> {
    let chat_id = parse_chat_id(&chat_id)?;
    let messages = state.service().messages(&chat_id).await?;
    Ok(to_dtos(messages, &state.user().id))
}

/// The chat screen is shown: follow it, suppress its notifications and mark
/// it read.
pub async fn open_chat(state: &AppState, chat_id: String) -> Result<Vec<MessageDto>> {
    let chat_id = parse_chat_id(&chat_id)?;
    let messages = state.service().open_chat(&chat_id).await?;
    Ok(to_dtos(messages, &state.user().id))
}

pub async fn close_chat(state: &AppState) -> Result<()> {
    state.service().close_chat().await;
    Ok(())
}

/// Write the message locally and start delivering it.
///
/// Returns immediately with the stored message (`sending` when online,
/// `failed` and queued when offline). Later status changes arrive as
/// `messages-updated` events.
pub async fn send_message(
    state: &AppState,
    chat_id: String,
    content: String,
) -> Result<MessageDto> {
    let chat_id = parse_chat_id(&chat_id)?;
    let pending = state.service().send_message(&chat_id, &content).await?;

    info!(
        chat = %chat_id,
        message = %pending.message.id,
        attempting = pending.is_attempting(),
        "Message submitted"
    );

    // Dropping the handle leaves the delivery running in the background.
    Ok(MessageDto::from_message(pending.message, &state.user().id))
}

pub async fn mark_chat_read(state: &AppState, chat_id: String) -> Result<usize> {
    let chat_id = parse_chat_id(&chat_id)?;
    Ok(state.service().mark_chat_read(&chat_id).await?)
}

/// Replay queued sends now instead of waiting for a reconnect.
pub async fn retry_pending(state: &AppState) -> Result<DrainReportDto> {
    let report = state.service().drain_queue().await?;
    Ok(report.into())
}
