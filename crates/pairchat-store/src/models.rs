//! Domain model structs persisted in the local cache database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the UI layer and embedded in sync queue payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pairchat_shared::constants::OP_SEND_MESSAGE;
use pairchat_shared::timestamp;
use pairchat_shared::{ChatId, MessageId, UserId};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Summary of the newest message in a chat, denormalized for list sorting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub sender_id: UserId,
}

/// A two-party conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Opaque stable identifier shared with the remote store.
    pub id: ChatId,
    /// The two participants (the schema tolerates more).
    pub participants: Vec<UserId>,
    /// Display name for every participant.
    pub participant_names: BTreeMap<UserId, String>,
    pub created_at: DateTime<Utc>,
    /// Never earlier than `created_at`.
    pub updated_at: DateTime<Utc>,
    /// Newest message once any exists.
    pub last_message: Option<LastMessage>,
    /// Inactive chats are logically deleted and hidden from listings.
    pub is_active: bool,
}

impl Chat {
    /// Display name of a participant, if known.
    pub fn name_of(&self, user: &UserId) -> Option<&str> {
        self.participant_names.get(user).map(String::as_str)
    }

    /// The participant that is not `me`.
    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != me)
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload kind. Only text is functionally implemented.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
        }
    }
}

impl FromStr for MessageType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            other => Err(StoreError::InvalidValue(format!("message type '{other}'"))),
        }
    }
}

/// Client-local delivery state.
///
/// ```text
/// sending -> sent | failed
/// failed  -> sent            (queued retry succeeded)
/// sent    -> delivered -> read
/// sent    -> read
/// ```
/// `read` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Failed => "failed",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`.
    /// Staying in the same state is always allowed.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Sending, Sent)
                | (Sending, Failed)
                | (Failed, Sent)
                | (Sent, Delivered)
                | (Sent, Read)
                | (Delivered, Read)
        )
    }

    /// Delivery receipts that a remote snapshot must not roll back.
    pub fn is_receipt(self) -> bool {
        matches!(self, MessageStatus::Delivered | MessageStatus::Read)
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            "failed" => Ok(MessageStatus::Failed),
            other => Err(StoreError::InvalidValue(format!("message status '{other}'"))),
        }
    }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique across local and remote stores; the dedup key.
    pub id: MessageId,
    pub chat_id: ChatId,
    /// Author identity as of send time.
    pub sender_id: UserId,
    pub sender_name: String,
    pub content: String,
    /// Logical send time. Ordering source of truth.
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
}

impl Message {
    /// Build a new outgoing text message stamped with the current time.
    pub fn new_text(
        chat_id: ChatId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        content: impl Into<String>,
        status: MessageStatus,
    ) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            sender_name: sender_name.into(),
            content: content.into(),
            timestamp: timestamp::now(),
            message_type: MessageType::Text,
            status,
        }
    }

    pub fn summary(&self) -> LastMessage {
        LastMessage {
            content: self.content.clone(),
            timestamp: self.timestamp,
            sender_id: self.sender_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sync queue
// ---------------------------------------------------------------------------

/// Kind of remote write waiting in the queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    SendMessage,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::SendMessage => OP_SEND_MESSAGE,
        }
    }
}

impl FromStr for SyncOperation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            OP_SEND_MESSAGE => Ok(SyncOperation::SendMessage),
            other => Err(StoreError::InvalidValue(format!("sync operation '{other}'"))),
        }
    }
}

/// A remote write that has not been confirmed yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub id: String,
    pub operation: SyncOperation,
    pub table_name: String,
    pub record_id: String,
    /// Full JSON payload needed to replay the write.
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: u32,
}

impl SyncQueueEntry {
    /// Queue entry replaying the send of `message`.
    pub fn send_message(message: &Message) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            operation: SyncOperation::SendMessage,
            table_name: "messages".to_string(),
            record_id: message.id.0.clone(),
            data: serde_json::to_string(message)?,
            created_at: timestamp::now(),
            retry_count: 0,
        })
    }

    /// Decode the payload of a `send_message` entry.
    pub fn message(&self) -> Result<Message> {
        Ok(serde_json::from_str(&self.data)?)
    }
}
