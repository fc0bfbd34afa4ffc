use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Deserialize;
use tracing::warn;

use companion_store::authz;
use companion_types::api::{
    ConversationResponse, ConversationsResponse, CreateConversationRequest, MessagesResponse,
};
use companion_types::events::MessagePayload;

use crate::error::ApiError;
use crate::session::SessionClaims;
use crate::state::{run_store, AppState};

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id;
    let conversations = run_store(&state.store, move |store| {
        store.list_conversations_for_user(user_id)
    })
    .await?;

    Ok(Json(ConversationsResponse { conversations }))
}

pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id;
    let title = req.title.and_then(|t| {
        let trimmed = t.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    });
    let member_ids = req.member_ids;

    let summary = run_store(&state.store, move |store| {
        let conversation =
            store.create_conversation(title.as_deref(), user_id, &member_ids, None)?;
        store.summarize_conversation(conversation, user_id)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ConversationResponse {
            conversation: summary,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

/// List a conversation's messages newest-first and advance the caller's
/// read cursor to the newest returned message.
pub async fn list_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    if conversation_id <= 0 {
        return Err(ApiError::InvalidInput("invalid conversation id".into()));
    }

    let user_id = claims.user_id;
    let is_member = run_store(&state.store, move |store| {
        authz::member_of(store, user_id, conversation_id)
    })
    .await?;
    if !is_member {
        return Err(ApiError::Forbidden("conversation access denied".into()));
    }

    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let messages = run_store(&state.store, move |store| {
        let messages = store.list_messages(conversation_id, limit, offset)?;
        // A cursor that fails to persist costs a re-notification, not the
        // request.
        if let Some(newest) = messages.first() {
            if let Err(e) = store.update_read_cursor(conversation_id, user_id, newest.id) {
                warn!(user = user_id, "update read cursor failed: {e}");
            }
        }
        Ok(messages)
    })
    .await?;

    let payloads = messages.iter().map(MessagePayload::from).collect();
    Ok(Json(MessagesResponse { messages: payloads }))
}
