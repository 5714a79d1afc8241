//! Mapping between remote wire records and local models.
//!
//! Timestamps are normalized here and nowhere else.

use std::collections::BTreeMap;

use pairchat_shared::constants::CHAT_PARTICIPANTS;
use pairchat_shared::protocol::{RemoteChat, RemoteLastMessage, RemoteMessage};
use pairchat_shared::{parse_timestamp, ChatId, MessageId, UserId};
use pairchat_store::{Chat, LastMessage, Message, MessageStatus, MessageType};

use crate::error::{Result, SyncError};

/// Turn a remote chat document into a [`Chat`].
pub fn chat_from_remote(remote: &RemoteChat) -> Result<Chat> {
    if remote.id.trim().is_empty() {
        return Err(invalid(&remote.id, "empty chat id"));
    }

    let mut participants: Vec<UserId> = Vec::with_capacity(remote.participants.len());
    for p in &remote.participants {
        let id = UserId::from(p.as_str());
        if !p.is_empty() && !participants.contains(&id) {
            participants.push(id);
        }
    }
    if participants.is_empty() {
        return Err(invalid(&remote.id, "no participants"));
    }
    if participants.len() != CHAT_PARTICIPANTS {
        tracing::warn!(
            chat = %remote.id,
            count = participants.len(),
            "chat does not have exactly two participants"
        );
    }

    let mut participant_names = BTreeMap::new();
    for p in &participants {
        let name = match remote.participant_names.get(p.as_str()) {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => {
                tracing::warn!(chat = %remote.id, user = %p, "participant name missing, using id prefix");
                p.short().to_string()
            }
        };
        participant_names.insert(p.clone(), name);
    }

    let created_at = parse_timestamp(&remote.created_at)?;
    let updated_at = parse_timestamp(&remote.updated_at)?.max(created_at);
    let last_message = remote
        .last_message
        .as_ref()
        .map(last_message_from_remote)
        .transpose()?;

    Ok(Chat {
        id: ChatId::from(remote.id.as_str()),
        participants,
        participant_names,
        created_at,
        updated_at,
        last_message,
        is_active: remote.is_active,
    })
}

fn last_message_from_remote(remote: &RemoteLastMessage) -> Result<LastMessage> {
    Ok(LastMessage {
        content: remote.content.clone(),
        timestamp: parse_timestamp(&remote.timestamp)?,
        sender_id: UserId::from(remote.sender_id.as_str()),
    })
}

/// Turn a remote message document into a [`Message`] with the given status.
///
/// A message the remote knows about has been written, so callers normally
/// pass [`MessageStatus::Sent`].
pub fn message_from_remote(remote: &RemoteMessage, status: MessageStatus) -> Result<Message> {
    if remote.id.trim().is_empty() {
        return Err(invalid(&remote.id, "empty message id"));
    }
    if remote.chat_id.trim().is_empty() {
        return Err(invalid(&remote.id, "empty chat id"));
    }

    let message_type = remote
        .message_type
        .parse::<MessageType>()
        .map_err(|e| invalid(&remote.id, &e.to_string()))?;

    Ok(Message {
        id: MessageId::from(remote.id.as_str()),
        chat_id: ChatId::from(remote.chat_id.as_str()),
        sender_id: UserId::from(remote.sender_id.as_str()),
        sender_name: remote.sender_name.clone(),
        content: remote.content.clone(),
        timestamp: parse_timestamp(&remote.timestamp)?,
        message_type,
        status,
    })
}

/// Wire form of a local message for [`RemoteSyncSource::send_message`].
///
/// [`RemoteSyncSource::send_message`]: crate::remote::RemoteSyncSource::send_message
pub fn message_to_remote(message: &Message) -> RemoteMessage {
    RemoteMessage {
        id: message.id.0.clone(),
        chat_id: message.chat_id.0.clone(),
        sender_id: message.sender_id.0.clone(),
        sender_name: message.sender_name.clone(),
        content: message.content.clone(),
        timestamp: message.timestamp.into(),
        message_type: message.message_type.as_str().to_string(),
    }
}

fn invalid(id: &str, reason: &str) -> SyncError {
    SyncError::InvalidRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::RawTimestamp;

    fn remote_chat() -> RemoteChat {
        RemoteChat {
            id: "c1".into(),
            participants: vec!["u1".into(), "u2".into()],
            participant_names: [("u1".to_string(), "Alice".to_string())].into(),
            created_at: RawTimestamp::EpochMillis(500),
            updated_at: RawTimestamp::Remote {
                seconds: 0,
                nanoseconds: 100_000_000,
            },
            last_message: Some(RemoteLastMessage {
                content: "hi".into(),
                timestamp: RawTimestamp::Iso("1970-01-01T00:00:00.100Z".into()),
                sender_id: "u1".into(),
            }),
            is_active: true,
        }
    }

    #[test]
    fn test_chat_is_normalized() {
        let chat = chat_from_remote(&remote_chat()).unwrap();

        assert_eq!(chat.participants.len(), 2);
        assert_eq!(chat.name_of(&"u1".into()), Some("Alice"));
        // Missing name falls back to the id.
        assert_eq!(chat.name_of(&"u2".into()), Some("u2"));
        // updated_at (100ms) is clamped up to created_at (500ms).
        assert_eq!(chat.updated_at, chat.created_at);
        assert_eq!(chat.last_message.unwrap().timestamp.timestamp_millis(), 100);
    }

    #[test]
    fn test_chat_without_participants_is_rejected() {
        let mut remote = remote_chat();
        remote.participants.clear();
        assert!(matches!(
            chat_from_remote(&remote),
            Err(SyncError::InvalidRecord { .. })
        ));
    }

    #[test]
    fn test_bad_timestamp_is_typed_error() {
        let mut remote = remote_chat();
        remote.created_at = RawTimestamp::Iso("yesterday".into());
        assert!(matches!(
            chat_from_remote(&remote),
            Err(SyncError::Timestamp(_))
        ));
    }

    #[test]
    fn test_message_round_trips_through_wire_form() {
        let local = Message::new_text(
            "c1".into(),
            "u1".into(),
            "Alice",
            "hello",
            MessageStatus::Sending,
        );
        let wire = message_to_remote(&local);
        assert_eq!(wire.message_type, "text");

        let back = message_from_remote(&wire, MessageStatus::Sent).unwrap();
        assert_eq!(back.id, local.id);
        assert_eq!(back.timestamp, local.timestamp);
        assert_eq!(back.status, MessageStatus::Sent);
    }

    #[test]
    fn test_unknown_message_type_is_rejected() {
        let mut wire = message_to_remote(&Message::new_text(
            "c1".into(),
            "u1".into(),
            "Alice",
            "x",
            MessageStatus::Sent,
        ));
        wire.message_type = "sticker".into();
        assert!(message_from_remote(&wire, MessageStatus::Sent).is_err());
    }
}
