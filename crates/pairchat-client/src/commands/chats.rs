use serde::Serialize;
use tracing::info;

use pairchat_shared::UserId;
use pairchat_store::Chat;

use crate::commands::parse_chat_id;
use crate::error::Result;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageDto {
    pub content: String,
    pub timestamp: String,
    pub sender_id: String,
    pub from_me: bool,
}

/// One row of the chat list, seen from the local user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDto {
    pub id: String,
    /// Display name of the other participant.
    pub title: String,
    pub participants: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_message: Option<LastMessageDto>,
}

impl ChatDto {
    pub fn from_chat(chat: Chat, me: &UserId) -> Self {
        let title = chat
            .other_participant(me)
            .map(|other| {
                chat.name_of(other)
                    .map(str::to_string)
                    .unwrap_or_else(|| other.short().to_string())
            })
            .unwrap_or_else(|| "Chat".to_string());

        Self {
            id: chat.id.to_string(),
            title,
            participants: chat.participants.iter().map(|p| p.to_string()).collect(),
            created_at: chat.created_at.to_rfc3339(),
            updated_at: chat.updated_at.to_rfc3339(),
            last_message: chat.last_message.map(|lm| LastMessageDto {
                from_me: &lm.sender_id == me,
                content: lm.content,
                timestamp: lm.timestamp.to_rfc3339(),
                sender_id: lm.sender_id.to_string(),
            }),
        }
    }
}

pub(crate) fn to_dtos(chats: Vec<Chat>, me: &UserId) -> Vec<ChatDto> {
    chats.into_iter().map(|c| ChatDto::from_chat(c, me)).collect()
}

/// Active chats, most recently updated first.
pub async fn list_chats(state: &AppState) -> Result<Vec<ChatDto>> {
    let chats = state.service().chats().await?;
    Ok(to_dtos(chats, &state.user().id))
}

/// Manual pull-to-refresh.
pub async fn refresh_chats(state: &AppState) -> Result<Vec<ChatDto>> {
    let chats = state.service().refresh().await?;
    info!(count = chats.len(), "Chats refreshed");
    Ok(to_dtos(chats, &state.user().id))
}

/// Leave a chat for both participants.
pub async fn leave_chat(state: &AppState, chat_id: String) -> Result<()> {
    let chat_id = parse_chat_id(&chat_id)?;
    state.service().leave_chat(&chat_id).await?;
    info!(chat = %chat_id, "Left chat");
    Ok(())
}
