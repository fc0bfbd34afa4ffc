mod config;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{middleware, Json, Router};
use serde::Deserialize;
use socket2::{Domain, Protocol, Socket, Type};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use companion_api::error::ApiError;
use companion_api::middleware::require_auth;
use companion_api::session::TokenSigner;
use companion_api::state::{run_store, AppState};
use companion_api::{auth, conversations, events, join_requests};
use companion_gateway::connection::{handle_session, MAX_INBOUND_FRAME_BYTES};
use companion_gateway::hub::Hub;
use companion_store::Store;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let store = Arc::new(Store::open(&config.db_path)?);
    store.ensure_seed_data()?;

    let state = AppState {
        store,
        signer: TokenSigner::new(&config.session_secret),
        hub: Hub::spawn(),
    };

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("companion server listening on {}", addr);

    // Listener via socket2 so accepted connections inherit TCP_NODELAY;
    // Nagle's algorithm adds visible latency to small WebSocket frames.
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(true)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(socket.into())?;

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/api/login", post(auth::login))
        .with_state(state.clone());

    let protected = Router::new()
        .route(
            "/api/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route(
            "/api/conversations/{id}/messages",
            get(conversations::list_messages),
        )
        .route(
            "/api/events",
            get(events::list_events).post(events::create_event),
        )
        .route("/api/events/{id}", delete(events::delete_event))
        .route(
            "/api/events/{id}/chat/requests",
            post(join_requests::request_join),
        )
        .route(
            "/api/events/{id}/chat/requests/{user_id}/approve",
            post(join_requests::approve_join),
        )
        .route(
            "/api/events/{id}/chat/requests/{user_id}/deny",
            post(join_requests::deny_join),
        )
        .route(
            "/api/events/{id}/chat/members/{user_id}",
            delete(join_requests::remove_member),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws = Router::new()
        .route("/api/ws", get(ws_upgrade))
        .with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(ws)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Authenticate via the `token` query parameter and hand the connection to
/// the hub. Rejections happen before the protocol handshake.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match query.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => token,
        _ => return (StatusCode::UNAUTHORIZED, "token is required").into_response(),
    };

    let claims = match state.signer.verify(token) {
        Ok(claims) => claims,
        Err(_) => return ApiError::Unauthenticated.into_response(),
    };
    let user_id = claims.user_id;

    // Snapshot the caller's memberships to seed the session's subscriptions.
    let subscriptions = match run_store(&state.store, move |store| {
        store.list_conversations_for_user(user_id)
    })
    .await
    {
        Ok(summaries) => summaries
            .iter()
            .map(|summary| summary.conversation.id)
            .collect::<HashSet<i64>>(),
        Err(e) => return e.into_response(),
    };

    let hub = state.hub.clone();
    let store = state.store.clone();
    ws.max_frame_size(MAX_INBOUND_FRAME_BYTES)
        .max_message_size(MAX_INBOUND_FRAME_BYTES)
        .on_upgrade(move |socket| handle_session(socket, hub, store, user_id, subscriptions))
}
