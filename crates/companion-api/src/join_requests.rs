use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};

use companion_store::authz;
use companion_store::StoreError;
use companion_types::api::{ApproveJoinResponse, JoinRequestResponse};
use companion_types::events::MembershipAction;

use crate::error::ApiError;
use crate::session::SessionClaims;
use crate::state::{run_store, AppState};

/// Ask to join an event's conversation. Resolves to pending until the host
/// decides.
pub async fn request_join(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id;
    let request = run_store(&state.store, move |store| {
        store.create_join_request(event_id, user_id)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(JoinRequestResponse { request })))
}

/// Approve a pending request; the requester becomes a member and connected
/// sessions are attached live.
pub async fn approve_join(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let approver_id = claims.user_id;
    let (request, conversation_id) = run_store(&state.store, move |store| {
        let request = store.approve_join_request(event_id, user_id, approver_id)?;
        let conversation = store.conversation_by_event(event_id)?;
        Ok((request, conversation.id))
    })
    .await?;

    state
        .hub
        .notify_membership(conversation_id, user_id, MembershipAction::Added)
        .await;

    Ok(Json(ApproveJoinResponse {
        request,
        conversation_id,
    }))
}

pub async fn deny_join(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let approver_id = claims.user_id;
    let request = run_store(&state.store, move |store| {
        store.deny_join_request(event_id, user_id, approver_id)
    })
    .await?;

    Ok(Json(JoinRequestResponse { request }))
}

/// Remove a member from an event's conversation. Allowed for the event host
/// (eviction) and for the member themselves (self-leave); the host can
/// never be the target.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((event_id, user_id)): Path<(i64, i64)>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller_id = claims.user_id;
    let conversation_id = run_store(&state.store, move |store| {
        let event = store.get_event_by_id(event_id)?;
        if !authz::is_event_host(&event, caller_id) && caller_id != user_id {
            return Err(StoreError::NotHost);
        }
        store.remove_event_member(event_id, user_id)?;
        let conversation = store.conversation_by_event(event_id)?;
        Ok(conversation.id)
    })
    .await?;

    state
        .hub
        .notify_membership(conversation_id, user_id, MembershipAction::Removed)
        .await;

    Ok(StatusCode::NO_CONTENT)
}
