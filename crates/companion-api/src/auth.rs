use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use companion_types::api::{LoginRequest, LoginResponse};

use crate::error::ApiError;
use crate::state::{run_store, AppState};

/// Exchange credentials for a session token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_string();
    if email.is_empty() || req.password.is_empty() {
        return Err(ApiError::InvalidInput(
            "email and password are required".into(),
        ));
    }

    let lookup_email = email.clone();
    let password = req.password;
    let user = run_store(&state.store, move |store| {
        store.authenticate_user(&lookup_email, &password)
    })
    .await?;

    let (token, claims) = state
        .signer
        .issue(user.id, &user.email)
        .map_err(|e| ApiError::storage(format!("encode session claims: {e}")))?;

    Ok(Json(LoginResponse {
        user,
        token,
        expires_at: claims.expires_at,
    }))
}
