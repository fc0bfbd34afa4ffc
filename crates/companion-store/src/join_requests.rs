use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use companion_types::models::JoinRequest;

use crate::conversations::{fetch_conversation_by_event, member_exists};
use crate::models::row_to_join_request;
use crate::{Result, Store, StoreError};

const SELECT_JOIN_REQUEST: &str = "SELECT id, event_id, user_id, status, created_at, decided_at, decided_by
 FROM conversation_join_requests";

impl Store {
    /// File a pending join request for an event's conversation.
    pub fn create_join_request(&self, event_id: i64, user_id: i64) -> Result<JoinRequest> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let host_id = event_host(&tx, event_id)?;
            if host_id == user_id {
                return Err(StoreError::AlreadyMember);
            }

            let convo = fetch_conversation_by_event(&tx, event_id)?;
            if member_exists(&tx, convo.id, user_id)? {
                return Err(StoreError::AlreadyMember);
            }
            if pending_request(&tx, event_id, user_id)?.is_some() {
                return Err(StoreError::RequestExists);
            }

            tx.execute(
                "INSERT INTO conversation_join_requests
                     (event_id, user_id, status, created_at)
                 VALUES (?1, ?2, 'pending', ?3)",
                params![event_id, user_id, Utc::now()],
            )?;
            let id = tx.last_insert_rowid();
            let request = fetch_request(&tx, id)?;

            tx.commit()?;
            Ok(request)
        })
    }

    /// Flip a pending request to `approved` and enroll the requester, in one
    /// transaction. Only the event host may approve.
    pub fn approve_join_request(
        &self,
        event_id: i64,
        requester_id: i64,
        approver_id: i64,
    ) -> Result<JoinRequest> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let host_id = event_host(&tx, event_id)?;
            if host_id != approver_id {
                return Err(StoreError::NotHost);
            }

            let convo = fetch_conversation_by_event(&tx, event_id)?;
            if member_exists(&tx, convo.id, requester_id)? {
                return Err(StoreError::AlreadyMember);
            }

            let pending =
                pending_request(&tx, event_id, requester_id)?.ok_or(StoreError::RequestNotFound)?;

            tx.execute(
                "UPDATE conversation_join_requests
                 SET status = 'approved', decided_at = ?1, decided_by = ?2
                 WHERE id = ?3",
                params![Utc::now(), approver_id, pending.id],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO conversation_members
                     (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'member', ?3)",
                params![convo.id, requester_id, Utc::now()],
            )?;

            let request = fetch_request(&tx, pending.id)?;
            tx.commit()?;
            Ok(request)
        })
    }

    /// Flip a pending request to `denied`. No membership change.
    pub fn deny_join_request(
        &self,
        event_id: i64,
        requester_id: i64,
        approver_id: i64,
    ) -> Result<JoinRequest> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let host_id = event_host(&tx, event_id)?;
            if host_id != approver_id {
                return Err(StoreError::NotHost);
            }

            let pending =
                pending_request(&tx, event_id, requester_id)?.ok_or(StoreError::RequestNotFound)?;

            tx.execute(
                "UPDATE conversation_join_requests
                 SET status = 'denied', decided_at = ?1, decided_by = ?2
                 WHERE id = ?3",
                params![Utc::now(), approver_id, pending.id],
            )?;

            let request = fetch_request(&tx, pending.id)?;
            tx.commit()?;
            Ok(request)
        })
    }

    /// Remove a member from an event's conversation, along with their read
    /// cursor. The event host can never be removed.
    pub fn remove_event_member(&self, event_id: i64, user_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let host_id = event_host(&tx, event_id)?;
            if host_id == user_id {
                return Err(StoreError::CannotRemoveHost);
            }

            let convo = fetch_conversation_by_event(&tx, event_id)?;
            if !member_exists(&tx, convo.id, user_id)? {
                return Err(StoreError::NotMember);
            }

            tx.execute(
                "DELETE FROM conversation_members
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![convo.id, user_id],
            )?;
            tx.execute(
                "DELETE FROM conversation_read_state
                 WHERE conversation_id = ?1 AND user_id = ?2",
                params![convo.id, user_id],
            )?;

            tx.commit()?;
            Ok(())
        })
    }
}

fn event_host(conn: &Connection, event_id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT user_id FROM events WHERE id = ?1",
        [event_id],
        |row| row.get(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::EventNotFound,
        other => StoreError::Sqlite(other),
    })
}

fn pending_request(
    conn: &Connection,
    event_id: i64,
    user_id: i64,
) -> Result<Option<JoinRequest>> {
    let request = conn
        .query_row(
            &format!(
                "{SELECT_JOIN_REQUEST}
                 WHERE event_id = ?1 AND user_id = ?2 AND status = 'pending'
                 LIMIT 1"
            ),
            params![event_id, user_id],
            row_to_join_request,
        )
        .optional()?;
    Ok(request)
}

fn fetch_request(conn: &Connection, id: i64) -> Result<JoinRequest> {
    conn.query_row(
        &format!("{SELECT_JOIN_REQUEST} WHERE id = ?1"),
        [id],
        row_to_join_request,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::RequestNotFound,
        other => StoreError::Sqlite(other),
    })
}
