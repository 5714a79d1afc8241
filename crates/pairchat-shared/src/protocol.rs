use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::timestamp::RawTimestamp;

/// A chat document as delivered by the remote store.
///
/// Timestamps are left raw here; they are normalized when the record is
/// ingested by the sync layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteChat {
    pub id: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub participant_names: BTreeMap<String, String>,
    pub created_at: RawTimestamp,
    pub updated_at: RawTimestamp,
    #[serde(default)]
    pub last_message: Option<RemoteLastMessage>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Denormalized summary of the newest message of a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLastMessage {
    pub content: String,
    pub timestamp: RawTimestamp,
    pub sender_id: String,
}

/// A message document as delivered by (or written to) the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: RawTimestamp,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
}

fn default_active() -> bool {
    true
}

fn default_message_type() -> String {
    "text".to_string()
}
