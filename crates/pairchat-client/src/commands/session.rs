use serde::Serialize;
use tracing::info;

use crate::commands::chats::ChatDto;
use crate::error::Result;
use crate::state::AppState;

/// A freshly created session, ready to render as a QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDto {
    pub session_id: String,
    /// Text to encode in the QR code.
    pub qr_payload: String,
}

pub async fn create_session(state: &AppState) -> Result<SessionDto> {
    let payload = state.service().create_session().await?;
    info!(session = %payload.session_id, "Session ready to share");
    Ok(SessionDto {
        qr_payload: payload.encode(),
        session_id: payload.session_id,
    })
}

/// Join from a scanned QR payload or a typed session id.
pub async fn join_session(state: &AppState, input: String) -> Result<ChatDto> {
    let chat = state.service().join_session(&input).await?;
    Ok(ChatDto::from_chat(chat, &state.user().id))
}
