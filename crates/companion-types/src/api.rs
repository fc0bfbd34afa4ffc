use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::MessagePayload;
use crate::models::{ConversationSummary, Event, JoinRequest, User};

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: User,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
    #[serde(rename = "memberIds", default)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation: ConversationSummary,
}

#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub conversations: Vec<ConversationSummary>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessagePayload>,
}

// -- Join requests --

#[derive(Debug, Serialize)]
pub struct JoinRequestResponse {
    pub request: JoinRequest,
}

#[derive(Debug, Serialize)]
pub struct ApproveJoinResponse {
    pub request: JoinRequest,
    #[serde(rename = "conversationId")]
    pub conversation_id: i64,
}

// -- Events --

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub title: String,
    pub location: String,
    pub time: String,
    #[serde(default)]
    pub description: String,
    pub gender: String,
    pub min_age: i64,
    pub max_age: i64,
    pub date_label: String,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub data: Vec<Event>,
}
