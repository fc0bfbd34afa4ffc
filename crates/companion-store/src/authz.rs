//! Authorization views over the store.
//!
//! Membership is always re-read from storage rather than cached: a user's
//! access can be revoked while their session is still alive, and the next
//! check has to see it.

use companion_types::models::Event;

use crate::{Result, Store};

pub fn member_of(store: &Store, user_id: i64, conversation_id: i64) -> Result<bool> {
    store.is_member(conversation_id, user_id)
}

pub fn is_event_host(event: &Event, user_id: i64) -> bool {
    event.user_id == user_id
}

/// Send authorization is plain membership, evaluated per send.
pub fn can_send(store: &Store, user_id: i64, conversation_id: i64) -> Result<bool> {
    member_of(store, user_id, conversation_id)
}
