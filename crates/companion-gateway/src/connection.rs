use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use companion_store::{authz, NewMessage, Store, StoreError};
use companion_types::events::{ClientFrame, MessagePayload, ServerEvent};
use companion_types::models::Message as StoredMessage;

use crate::hub::{next_session_id, ClientSession, Hub, OUTBOUND_CAPACITY};
use crate::rate_limit::MessageRateLimiter;

/// Inbound frames above this size terminate the session.
pub const MAX_INBOUND_FRAME_BYTES: usize = 1024;

/// Keepalive ping cadence; a healthy client pongs well within the read
/// deadline.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(50);
/// Per-frame write deadline; a socket slower than this ends the session.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);
/// Read deadline; any inbound frame (pong included) extends it.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Storage deadline for the send path.
const STORAGE_DEADLINE: Duration = Duration::from_secs(5);

/// Run one authenticated WebSocket session until the peer goes away.
///
/// The caller has already verified the token and snapshotted the user's
/// conversation memberships for the initial subscription set.
pub async fn handle_session(
    socket: WebSocket,
    hub: Hub,
    store: Arc<Store>,
    user_id: i64,
    initial_subscriptions: HashSet<i64>,
) {
    let (ws_tx, ws_rx) = socket.split();

    // Fan-out path: the hub holds the only sender; the channel closing is
    // the writer's shutdown signal.
    let (outbound_tx, outbound_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_CAPACITY);
    // Session-local replies (pong, rate-limit errors) bypass the hub.
    let (direct_tx, direct_rx) = mpsc::channel::<Arc<str>>(OUTBOUND_CAPACITY);

    let session_id = next_session_id();
    hub.register(ClientSession {
        id: session_id,
        user_id,
        outbound: outbound_tx,
        subscriptions: initial_subscriptions,
    })
    .await;

    debug!(session = session_id, user = user_id, "chat session connected");

    let writer = tokio::spawn(write_pump(ws_tx, outbound_rx, direct_rx));

    read_pump(ws_rx, &hub, &store, user_id, direct_tx).await;

    hub.unregister(session_id).await;
    let _ = writer.await;
    debug!(session = session_id, user = user_id, "chat session closed");
}

/// Forward outbound frames and keep the connection alive.
async fn write_pump(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Arc<str>>,
    mut direct_rx: mpsc::Receiver<Arc<str>>,
) {
    let mut keepalive = tokio::time::interval(KEEPALIVE_INTERVAL);
    keepalive.tick().await; // skip the immediate first tick
    let mut direct_open = true;

    loop {
        tokio::select! {
            maybe = outbound_rx.recv() => match maybe {
                Some(frame) => {
                    if write_frame(&mut ws_tx, frame).await.is_err() {
                        break;
                    }
                }
                // Hub dropped the session (unregister or slow-consumer
                // eviction): clean shutdown.
                None => break,
            },
            maybe = direct_rx.recv(), if direct_open => match maybe {
                Some(frame) => {
                    if write_frame(&mut ws_tx, frame).await.is_err() {
                        break;
                    }
                }
                None => direct_open = false,
            },
            _ = keepalive.tick() => {
                let ping = timeout(WRITE_DEADLINE, ws_tx.send(Message::Ping(Vec::new().into())));
                match ping.await {
                    Ok(Ok(())) => {}
                    _ => break,
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}

async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: Arc<str>,
) -> Result<(), ()> {
    match timeout(WRITE_DEADLINE, ws_tx.send(Message::Text(frame.to_string().into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) | Err(_) => Err(()),
    }
}

/// Decode inbound frames and dispatch recognized commands until EOF,
/// error, or the read deadline passes with no traffic.
async fn read_pump(
    mut ws_rx: SplitStream<WebSocket>,
    hub: &Hub,
    store: &Arc<Store>,
    user_id: i64,
    direct_tx: mpsc::Sender<Arc<str>>,
) {
    let mut rate_limiter = MessageRateLimiter::new();

    loop {
        let frame = match timeout(READ_DEADLINE, ws_rx.next()).await {
            Err(_) => {
                debug!(user = user_id, "read deadline passed, closing session");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(user = user_id, "websocket read error: {e}");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => {
                let inbound: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(user = user_id, "invalid inbound payload: {e}");
                        continue;
                    }
                };

                match inbound {
                    ClientFrame::MessageSend {
                        conversation_id,
                        body,
                        temp_id,
                    } => {
                        handle_send(
                            hub,
                            store,
                            user_id,
                            &mut rate_limiter,
                            &direct_tx,
                            conversation_id,
                            body,
                            temp_id,
                        )
                        .await;
                    }
                    ClientFrame::Ping => send_direct(&direct_tx, &ServerEvent::Pong),
                    ClientFrame::Unknown => {
                        warn!(user = user_id, "unknown message type, ignoring");
                    }
                }
            }
            Message::Close(_) => break,
            // Pongs (and protocol pings, answered by the stack) only count
            // as read activity.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
        }
    }
}

/// The `message:send` path: validate, rate-limit, re-check membership
/// against the store, persist, advance the sender's cursor, broadcast.
#[allow(clippy::too_many_arguments)]
async fn handle_send(
    hub: &Hub,
    store: &Arc<Store>,
    user_id: i64,
    rate_limiter: &mut MessageRateLimiter,
    direct_tx: &mpsc::Sender<Arc<str>>,
    conversation_id: i64,
    body: String,
    temp_id: String,
) {
    if conversation_id <= 0 || body.trim().is_empty() {
        return;
    }

    if !rate_limiter.allow(Instant::now()) {
        warn!(user = user_id, "message rate limit exceeded");
        send_direct(
            direct_tx,
            &ServerEvent::SystemError {
                code: "rate_limited".into(),
            },
        );
        return;
    }

    // Membership is always re-read from the store, never trusted from the
    // in-memory subscription set: a removal must take effect on the very
    // next send.
    let persist_store = store.clone();
    let persist = tokio::task::spawn_blocking(move || -> Result<Option<StoredMessage>, StoreError> {
        if !authz::can_send(&persist_store, user_id, conversation_id)? {
            return Ok(None);
        }
        let msg = persist_store.create_message(NewMessage {
            conversation_id,
            sender_id: user_id,
            body,
            attachment_url: None,
            delivery_status: "sent".into(),
        })?;
        // Best effort: the sender has obviously seen their own message.
        if let Err(e) = persist_store.update_read_cursor(conversation_id, user_id, msg.id) {
            warn!(user = user_id, "update read cursor after send failed: {e}");
        }
        Ok(Some(msg))
    });

    let msg = match timeout(STORAGE_DEADLINE, persist).await {
        Err(_) => {
            warn!(user = user_id, "send path hit the storage deadline");
            return;
        }
        Ok(Err(e)) => {
            warn!(user = user_id, "send path task failed: {e}");
            return;
        }
        Ok(Ok(Err(StoreError::NotMember))) => {
            warn!(
                user = user_id,
                conversation = conversation_id,
                "send raced a membership removal, dropped"
            );
            return;
        }
        Ok(Ok(Err(e))) => {
            warn!(user = user_id, "create message failed: {e}");
            return;
        }
        Ok(Ok(Ok(None))) => {
            warn!(
                user = user_id,
                conversation = conversation_id,
                "send without membership, dropped"
            );
            return;
        }
        Ok(Ok(Ok(Some(msg)))) => msg,
    };

    let event = ServerEvent::MessageNew {
        temp_id,
        message: MessagePayload::from(&msg),
    };
    match serde_json::to_string(&event) {
        Ok(json) => hub.broadcast(msg.conversation_id, Arc::from(json.as_str())).await,
        Err(e) => warn!("failed to encode message event: {e}"),
    }
}

/// Non-blocking session-local reply; dropped on a full queue like any other
/// frame to a slow consumer.
fn send_direct(direct_tx: &mpsc::Sender<Arc<str>>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = direct_tx.try_send(Arc::from(json.as_str()));
        }
        Err(e) => warn!("failed to encode direct reply: {e}"),
    }
}
