use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::types::LocalUser;

const MAX_SESSION_ID_LEN: usize = 128;

/// Payload carried by a session QR code (or typed in manually).
///
/// The wire form is either JSON `{"sessionId": .., "creatorId": .., "creatorName": ..}`
/// or just the bare session id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionJoinPayload {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator_name: Option<String>,
}

impl SessionJoinPayload {
    /// Create a fresh session advertised by `creator`.
    pub fn create(creator: &LocalUser) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            creator_id: Some(creator.id.0.clone()),
            creator_name: Some(creator.display_name.clone()),
        }
    }

    /// JSON text to render into a QR code.
    pub fn encode(&self) -> String {
        // A struct of strings always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| self.session_id.clone())
    }

    /// Parse a scanned or typed payload.
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(SessionError::Empty);
        }

        let payload = if input.starts_with('{') {
            let payload: SessionJoinPayload = serde_json::from_str(input)
                .map_err(|e| SessionError::InvalidJson(e.to_string()))?;
            Self {
                session_id: payload.session_id.trim().to_string(),
                creator_id: payload.creator_id.filter(|s| !s.trim().is_empty()),
                creator_name: payload.creator_name.filter(|s| !s.trim().is_empty()),
            }
        } else {
            Self {
                session_id: input.to_string(),
                creator_id: None,
                creator_name: None,
            }
        };

        validate_session_id(&payload.session_id)?;
        Ok(payload)
    }
}

fn validate_session_id(id: &str) -> Result<(), SessionError> {
    if id.is_empty() {
        return Err(SessionError::MissingSessionId);
    }
    let ok = id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !ok {
        return Err(SessionError::InvalidSessionId(id.to_string()));
    }
    Ok(())
}
