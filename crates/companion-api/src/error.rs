use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use companion_store::StoreError;

/// Request-level failures with their HTTP mapping. Domain errors from the
/// store become the 4xx categories; anything unexpected is `Storage`.
#[derive(Debug)]
pub enum ApiError {
    /// Bad path param, malformed body, out-of-range values.
    InvalidInput(String),
    /// Missing/malformed/expired token.
    Unauthenticated,
    /// The caller is not allowed to do this.
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// Valid request shape, but a domain rule forbids it.
    DomainRule(String),
    /// Unexpected backend failure; logged with context, surfaced as 500.
    Storage(String),
}

impl ApiError {
    pub fn storage(context: impl Into<String>) -> Self {
        Self::Storage(context.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthenticated => {
                (StatusCode::UNAUTHORIZED, "invalid or expired token".into())
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DomainRule(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Storage(context) => {
                error!("storage failure: {context}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".into(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidCredentials => ApiError::Unauthenticated,
            StoreError::EventNotFound => ApiError::NotFound("event not found".into()),
            StoreError::RequestNotFound => ApiError::NotFound("join request not found".into()),
            StoreError::NotMember => {
                ApiError::NotFound("user is not a conversation member".into())
            }
            StoreError::AlreadyMember => {
                ApiError::Conflict("user already a conversation member".into())
            }
            StoreError::RequestExists => {
                ApiError::Conflict("join request already pending".into())
            }
            StoreError::NotHost => ApiError::Forbidden("user is not the event host".into()),
            StoreError::CannotRemoveHost => ApiError::DomainRule(
                "event host cannot be removed from the conversation".into(),
            ),
            // An event without its conversation is an internal inconsistency.
            StoreError::ConversationNotFound => {
                ApiError::storage("conversation missing for event")
            }
            other => ApiError::storage(other.to_string()),
        }
    }
}
