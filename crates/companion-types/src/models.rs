use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered user. The password hash never leaves the store layer.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A published event; every event owns exactly one group conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub description: String,
    pub gender: String,
    pub min_age: i64,
    pub max_age: i64,
    pub date_label: String,
    pub host_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_url: Option<String>,
    pub delivery_status: String,
    pub created_at: DateTime<Utc>,
}

/// Newest-message preview shown in conversation listings.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub id: i64,
    pub sender_id: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationParticipant {
    pub id: i64,
    pub name: String,
}

/// Event metadata embedded in summaries of event-group conversations.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationEventMeta {
    pub id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub date_label: String,
}

/// A conversation hydrated for the viewing user: members, participants in
/// join order, newest message, unread count, and event metadata when the
/// conversation belongs to an event.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub member_ids: Vec<i64>,
    pub participants: Vec<ConversationParticipant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ConversationEventMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageSummary>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinRequestStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinRequest {
    pub id: i64,
    pub event_id: i64,
    pub user_id: i64,
    pub status: JoinRequestStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<i64>,
}
