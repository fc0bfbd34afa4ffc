use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use companion_types::events::MembershipAction;

use crate::hub::{next_session_id, ClientSession, Hub, SessionId, OUTBOUND_CAPACITY};

async fn register_session(
    hub: &Hub,
    user_id: i64,
    conversations: &[i64],
) -> (SessionId, mpsc::Receiver<Arc<str>>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let id = next_session_id();
    hub.register(ClientSession {
        id,
        user_id,
        outbound: tx,
        subscriptions: conversations.iter().copied().collect(),
    })
    .await;
    (id, rx)
}

async fn recv_json(rx: &mut mpsc::Receiver<Arc<str>>) -> serde_json::Value {
    let frame = timeout(Duration::from_millis(250), rx.recv())
        .await
        .expect("expected a frame within the timeout")
        .expect("channel open");
    serde_json::from_str(&frame).expect("valid JSON frame")
}

async fn assert_silent(rx: &mut mpsc::Receiver<Arc<str>>) {
    let unexpected = timeout(Duration::from_millis(50), rx.recv()).await;
    assert!(unexpected.is_err(), "unexpected frame: {unexpected:?}");
}

#[tokio::test]
async fn broadcasts_reach_only_that_conversations_subscribers() {
    let hub = Hub::spawn();
    let (_, mut rx_a) = register_session(&hub, 1, &[10]).await;
    let (_, mut rx_b) = register_session(&hub, 2, &[20]).await;

    hub.broadcast(10, Arc::from(r#"{"type":"message:new","n":1}"#)).await;

    let frame = recv_json(&mut rx_a).await;
    assert_eq!(frame["n"], 1);
    assert_silent(&mut rx_b).await;
}

#[tokio::test]
async fn every_device_of_a_user_receives_each_broadcast_once() {
    let hub = Hub::spawn();
    let (_, mut phone) = register_session(&hub, 7, &[10]).await;
    let (_, mut laptop) = register_session(&hub, 7, &[10]).await;

    hub.broadcast(10, Arc::from(r#"{"type":"message:new","n":1}"#)).await;

    assert_eq!(recv_json(&mut phone).await["n"], 1);
    assert_eq!(recv_json(&mut laptop).await["n"], 1);
    assert_silent(&mut phone).await;
    assert_silent(&mut laptop).await;
}

#[tokio::test]
async fn membership_added_attaches_live_sessions_before_the_event() {
    let hub = Hub::spawn();
    let (_, mut member) = register_session(&hub, 1, &[10]).await;
    let (_, mut joiner) = register_session(&hub, 4, &[]).await;

    hub.notify_membership(10, 4, MembershipAction::Added).await;

    // Both the existing subscriber and the fresh one see the event.
    let event = recv_json(&mut joiner).await;
    assert_eq!(event["type"], "conversation:membership");
    assert_eq!(event["conversationId"], 10);
    assert_eq!(event["userId"], 4);
    assert_eq!(event["action"], "added");
    assert_eq!(recv_json(&mut member).await["action"], "added");

    // Anything broadcast after the event reaches the new subscriber.
    hub.broadcast(10, Arc::from(r#"{"type":"message:new","n":2}"#)).await;
    assert_eq!(recv_json(&mut joiner).await["n"], 2);
}

#[tokio::test]
async fn membership_removed_detaches_and_still_notifies_the_removed_user() {
    let hub = Hub::spawn();
    let (_, mut member) = register_session(&hub, 1, &[10]).await;
    let (_, mut removed) = register_session(&hub, 4, &[10]).await;

    hub.notify_membership(10, 4, MembershipAction::Removed).await;

    let event = recv_json(&mut removed).await;
    assert_eq!(event["type"], "conversation:membership");
    assert_eq!(event["action"], "removed");
    assert_eq!(recv_json(&mut member).await["action"], "removed");

    hub.broadcast(10, Arc::from(r#"{"type":"message:new","n":3}"#)).await;
    assert_eq!(recv_json(&mut member).await["n"], 3);
    assert_silent(&mut removed).await;
}

#[tokio::test]
async fn slow_consumers_are_dropped_not_waited_on() {
    let hub = Hub::spawn();
    let (_, mut rx) = register_session(&hub, 1, &[10]).await;
    let (_, mut healthy) = register_session(&hub, 2, &[10]).await;

    // One more than the outbound capacity, with nobody draining.
    for n in 0..=OUTBOUND_CAPACITY {
        hub.broadcast(10, Arc::from(format!(r#"{{"n":{n}}}"#).as_str())).await;
        // Keep the healthy session from filling up too.
        assert_eq!(recv_json(&mut healthy).await["n"], n);
    }

    // The stalled session got the first eight frames, then its channel was
    // closed by the eviction.
    for n in 0..OUTBOUND_CAPACITY {
        assert_eq!(recv_json(&mut rx).await["n"], n);
    }
    let closed = timeout(Duration::from_millis(250), rx.recv()).await;
    assert_eq!(closed.expect("close signal in time"), None);

    // The healthy session keeps receiving.
    hub.broadcast(10, Arc::from(r#"{"n":99}"#)).await;
    assert_eq!(recv_json(&mut healthy).await["n"], 99);
}

#[tokio::test]
async fn unregister_tears_down_and_tolerates_double_close() {
    let hub = Hub::spawn();
    let (id, mut rx) = register_session(&hub, 1, &[10]).await;

    hub.unregister(id).await;
    hub.unregister(id).await;

    let closed = timeout(Duration::from_millis(250), rx.recv()).await;
    assert_eq!(closed.expect("close signal in time"), None);

    // Broadcasting into the now-empty conversation is harmless.
    hub.broadcast(10, Arc::from(r#"{"n":1}"#)).await;
}

#[tokio::test]
async fn membership_changes_for_offline_users_still_notify_subscribers() {
    let hub = Hub::spawn();
    let (_, mut member) = register_session(&hub, 1, &[10]).await;

    // User 9 has no live session; subscribers still hear about the change.
    hub.notify_membership(10, 9, MembershipAction::Added).await;
    assert_eq!(recv_json(&mut member).await["userId"], 9);
}
