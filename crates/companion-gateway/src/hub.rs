use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use companion_types::events::{MembershipAction, ServerEvent};

pub type SessionId = u64;

/// Bounded per-session outbound queue; a subscriber that falls this far
/// behind is dropped rather than allowed to block the fan-out.
pub const OUTBOUND_CAPACITY: usize = 8;

/// `membership` is buffered so HTTP handlers never block on a busy hub.
const MEMBERSHIP_QUEUE_CAPACITY: usize = 16;

/// A live client session as registered with the hub.
///
/// The hub worker owns this value until unregistration; the connection side
/// keeps only the session id and the receiving half of `outbound`. Dropping
/// the session here closes `outbound`, which the writer pump treats as a
/// clean shutdown; that channel is the teardown rendezvous.
pub struct ClientSession {
    pub id: SessionId,
    pub user_id: i64,
    pub outbound: mpsc::Sender<Arc<str>>,
    pub subscriptions: HashSet<i64>,
}

pub fn next_session_id() -> SessionId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct Broadcast {
    conversation_id: i64,
    payload: Arc<str>,
}

struct MembershipChange {
    conversation_id: i64,
    user_id: i64,
    action: MembershipAction,
}

/// Handle to the hub worker. Cheap to clone; all mutation goes through the
/// worker's queues, so the session and subscriber maps need no locks.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::Sender<ClientSession>,
    unregister_tx: mpsc::Sender<SessionId>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    membership_tx: mpsc::Sender<MembershipChange>,
}

impl Hub {
    /// Start the hub worker on the current runtime and return its handle.
    pub fn spawn() -> Self {
        // Capacity 1 is the closest tokio gets to an unbuffered channel:
        // senders park until the worker picks the item up, which gives the
        // register/unregister/broadcast paths natural backpressure.
        let (register_tx, register_rx) = mpsc::channel(1);
        let (unregister_tx, unregister_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(1);
        let (membership_tx, membership_rx) = mpsc::channel(MEMBERSHIP_QUEUE_CAPACITY);

        let worker = HubWorker::default();
        tokio::spawn(worker.run(register_rx, unregister_rx, broadcast_rx, membership_rx));

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            membership_tx,
        }
    }

    pub async fn register(&self, session: ClientSession) {
        if self.register_tx.send(session).await.is_err() {
            warn!("hub worker gone, dropping register");
        }
    }

    /// Idempotent: unknown session ids are ignored by the worker.
    pub async fn unregister(&self, session_id: SessionId) {
        if self.unregister_tx.send(session_id).await.is_err() {
            warn!("hub worker gone, dropping unregister");
        }
    }

    /// Fan a pre-serialized frame out to the conversation's subscribers.
    pub async fn broadcast(&self, conversation_id: i64, payload: Arc<str>) {
        let msg = Broadcast {
            conversation_id,
            payload,
        };
        if self.broadcast_tx.send(msg).await.is_err() {
            warn!("hub worker gone, dropping broadcast");
        }
    }

    /// Tell connected sessions about a membership change and emit the
    /// `conversation:membership` event to the conversation's subscribers.
    pub async fn notify_membership(
        &self,
        conversation_id: i64,
        user_id: i64,
        action: MembershipAction,
    ) {
        let msg = MembershipChange {
            conversation_id,
            user_id,
            action,
        };
        if self.membership_tx.send(msg).await.is_err() {
            warn!("hub worker gone, dropping membership change");
        }
    }
}

/// Single-consumer loop that owns the session registry and both fan-out
/// indices. Being the only consumer of the queues serializes every mutation
/// and yields a total per-conversation broadcast order for each subscriber.
#[derive(Default)]
struct HubWorker {
    sessions: HashMap<SessionId, ClientSession>,
    clients_by_user: HashMap<i64, HashSet<SessionId>>,
    subscribers: HashMap<i64, HashSet<SessionId>>,
}

impl HubWorker {
    async fn run(
        mut self,
        mut register_rx: mpsc::Receiver<ClientSession>,
        mut unregister_rx: mpsc::Receiver<SessionId>,
        mut broadcast_rx: mpsc::Receiver<Broadcast>,
        mut membership_rx: mpsc::Receiver<MembershipChange>,
    ) {
        loop {
            // Biased toward state changes: a queued registration or
            // membership update is applied before any broadcast queued
            // behind it, so a fresh subscriber never misses a frame that
            // was produced after its attachment.
            tokio::select! {
                biased;
                Some(session) = register_rx.recv() => self.add_session(session),
                Some(session_id) = unregister_rx.recv() => self.remove_session(session_id),
                Some(change) = membership_rx.recv() => self.apply_membership(change),
                Some(msg) = broadcast_rx.recv() => {
                    self.fan_out(msg.conversation_id, msg.payload);
                }
                else => break,
            }
        }
        debug!("hub worker stopped");
    }

    fn add_session(&mut self, session: ClientSession) {
        for conversation_id in &session.subscriptions {
            self.subscribers
                .entry(*conversation_id)
                .or_default()
                .insert(session.id);
        }
        self.clients_by_user
            .entry(session.user_id)
            .or_default()
            .insert(session.id);
        debug!(
            session = session.id,
            user = session.user_id,
            conversations = session.subscriptions.len(),
            "session registered"
        );
        self.sessions.insert(session.id, session);
    }

    fn remove_session(&mut self, session_id: SessionId) {
        let Some(session) = self.sessions.remove(&session_id) else {
            return;
        };
        for conversation_id in &session.subscriptions {
            if let Some(subs) = self.subscribers.get_mut(conversation_id) {
                subs.remove(&session_id);
                if subs.is_empty() {
                    self.subscribers.remove(conversation_id);
                }
            }
        }
        if let Some(ids) = self.clients_by_user.get_mut(&session.user_id) {
            ids.remove(&session_id);
            if ids.is_empty() {
                self.clients_by_user.remove(&session.user_id);
            }
        }
        debug!(session = session_id, "session unregistered");
        // Dropping `session` here closes its outbound channel; the writer
        // pump exits and closes the socket.
    }

    fn fan_out(&mut self, conversation_id: i64, payload: Arc<str>) {
        let Some(subs) = self.subscribers.get(&conversation_id) else {
            return;
        };
        let targets: Vec<SessionId> = subs.iter().copied().collect();

        for session_id in targets {
            let Some(session) = self.sessions.get(&session_id) else {
                continue;
            };
            match session.outbound.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow consumer: evict rather than block the worker.
                    warn!(
                        session = session_id,
                        user = session.user_id,
                        "outbound queue full, dropping slow subscriber"
                    );
                    self.remove_session(session_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.remove_session(session_id);
                }
            }
        }
    }

    fn apply_membership(&mut self, change: MembershipChange) {
        let MembershipChange {
            conversation_id,
            user_id,
            action,
        } = change;

        let session_ids: Vec<SessionId> = self
            .clients_by_user
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        match action {
            MembershipAction::Added => {
                let subs = self.subscribers.entry(conversation_id).or_default();
                for session_id in &session_ids {
                    subs.insert(*session_id);
                }
                for session_id in &session_ids {
                    if let Some(session) = self.sessions.get_mut(session_id) {
                        session.subscriptions.insert(conversation_id);
                    }
                }
            }
            MembershipAction::Removed => {
                if let Some(subs) = self.subscribers.get_mut(&conversation_id) {
                    for session_id in &session_ids {
                        subs.remove(session_id);
                    }
                    if subs.is_empty() {
                        self.subscribers.remove(&conversation_id);
                    }
                }
                for session_id in &session_ids {
                    if let Some(session) = self.sessions.get_mut(session_id) {
                        session.subscriptions.remove(&conversation_id);
                    }
                }
            }
        }

        // Indices are updated before the event goes out, so a freshly added
        // subscriber observes every message broadcast after this point.
        let event = ServerEvent::ConversationMembership {
            conversation_id,
            user_id,
            action,
        };
        let payload: Arc<str> = match serde_json::to_string(&event) {
            Ok(json) => Arc::from(json.as_str()),
            Err(e) => {
                warn!("failed to encode membership event: {e}");
                return;
            }
        };
        self.fan_out(conversation_id, payload.clone());

        // A removed user is no longer a subscriber, but their sessions still
        // need to hear that they were removed.
        if action == MembershipAction::Removed {
            for session_id in session_ids {
                if let Some(session) = self.sessions.get(&session_id) {
                    if session.outbound.try_send(payload.clone()).is_err() {
                        self.remove_session(session_id);
                    }
                }
            }
        }
    }
}
