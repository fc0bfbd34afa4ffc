use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use companion_store::CreateEventParams;
use companion_types::api::{CreateEventRequest, EventsResponse};

use crate::error::ApiError;
use crate::session::SessionClaims;
use crate::state::{run_store, AppState};

pub async fn list_events(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let events = run_store(&state.store, |store| store.list_events()).await?;
    Ok(Json(EventsResponse { data: events }))
}

/// Publish an event. Its group conversation is created in the same
/// transaction with the caller enrolled as owner.
pub async fn create_event(
    State(state): State<AppState>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<CreateEventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate(&req)?;

    let params = CreateEventParams {
        user_id: claims.user_id,
        title: req.title,
        location: req.location,
        time: req.time,
        description: req.description,
        gender: req.gender,
        min_age: req.min_age,
        max_age: req.max_age,
        date_label: req.date_label,
    };
    let id = run_store(&state.store, move |store| store.create_event(params)).await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Delete an event the caller hosts. Foreign keys cascade the removal to
/// the conversation and everything hanging off it.
pub async fn delete_event(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    Extension(claims): Extension<SessionClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let host_id = claims.user_id;
    run_store(&state.store, move |store| {
        store.delete_event(event_id, host_id)
    })
    .await?;

    Ok(Json(json!({ "message": "event deleted" })))
}

fn validate(req: &CreateEventRequest) -> Result<(), ApiError> {
    for (field, value) in [
        ("title", &req.title),
        ("location", &req.location),
        ("time", &req.time),
        ("gender", &req.gender),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::InvalidInput(format!("{field} is required")));
        }
    }
    if req.min_age < 0 {
        return Err(ApiError::InvalidInput("min_age must not be negative".into()));
    }
    if req.max_age < req.min_age {
        return Err(ApiError::InvalidInput(
            "max_age must be greater than or equal to min_age".into(),
        ));
    }
    if req.date_label != "Today" && req.date_label != "Tmrw" {
        return Err(ApiError::InvalidInput(
            "date_label must be one of Today, Tmrw".into(),
        ));
    }
    Ok(())
}
