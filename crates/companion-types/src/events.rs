use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};

use crate::models::Message;

/// Frames sent FROM client TO server over the WebSocket.
///
/// Inbound payloads are a tagged union over `type`; anything unrecognized
/// decodes to `Unknown` and is logged and ignored by the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(rename = "conversationId", default)]
        conversation_id: i64,
        #[serde(default)]
        body: String,
        #[serde(rename = "tempId", default)]
        temp_id: String,
    },

    #[serde(rename = "ping")]
    Ping,

    #[serde(other)]
    Unknown,
}

/// Frames sent FROM server TO client over the WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A message was persisted and is being fanned out to subscribers.
    ///
    /// `temp_id` echoes the sender's optimistic-send correlator to every
    /// subscriber; clients reconcile by `(senderId, tempId)`.
    #[serde(rename = "message:new")]
    MessageNew {
        #[serde(rename = "tempId", skip_serializing_if = "String::is_empty")]
        temp_id: String,
        message: MessagePayload,
    },

    /// A user was added to or removed from a conversation.
    #[serde(rename = "conversation:membership")]
    ConversationMembership {
        #[serde(rename = "conversationId")]
        conversation_id: i64,
        #[serde(rename = "userId")]
        user_id: i64,
        action: MembershipAction,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "system:error")]
    SystemError { code: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipAction {
    Added,
    Removed,
}

/// Message body shared by the WebSocket fan-out and the REST message list.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: i64,
    #[serde(rename = "conversationId")]
    pub conversation_id: i64,
    #[serde(rename = "senderId")]
    pub sender_id: i64,
    pub body: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl From<&Message> for MessagePayload {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            body: msg.body.clone(),
            created_at: msg
                .created_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}
