//! Row-mapping helpers. Wire-facing shapes live in `companion-types`; this
//! module keeps the SQLite column order in one place.

use chrono::{DateTime, Utc};
use rusqlite::Row;

use companion_types::models::{
    Conversation, Event, JoinRequest, JoinRequestStatus, Message, User,
};

/// Internal row carrying the stored password hash. Never leaves the crate.
pub(crate) struct UserAuthRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserAuthRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            email: self.email,
            created_at: self.created_at,
        }
    }
}

pub(crate) fn row_to_user_auth(row: &Row<'_>) -> rusqlite::Result<UserAuthRow> {
    Ok(UserAuthRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// Column order: id, title, created_by, created_at, event_id.
pub(crate) fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_by: row.get(2)?,
        created_at: row.get(3)?,
        event_id: row.get(4)?,
    })
}

/// Column order: id, conversation_id, sender_id, body, attachment_url,
/// delivery_status, created_at.
pub(crate) fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        attachment_url: row.get(4)?,
        delivery_status: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Column order: id, event_id, user_id, status, created_at, decided_at,
/// decided_by.
pub(crate) fn row_to_join_request(row: &Row<'_>) -> rusqlite::Result<JoinRequest> {
    let status: String = row.get(3)?;
    Ok(JoinRequest {
        id: row.get(0)?,
        event_id: row.get(1)?,
        user_id: row.get(2)?,
        status: parse_status(&status, 3)?,
        created_at: row.get(4)?,
        decided_at: row.get(5)?,
        decided_by: row.get(6)?,
    })
}

fn parse_status(raw: &str, col: usize) -> rusqlite::Result<JoinRequestStatus> {
    match raw {
        "pending" => Ok(JoinRequestStatus::Pending),
        "approved" => Ok(JoinRequestStatus::Approved),
        "denied" => Ok(JoinRequestStatus::Denied),
        other => Err(rusqlite::Error::FromSqlConversionFailure(
            col,
            rusqlite::types::Type::Text,
            format!("unknown join request status: {other}").into(),
        )),
    }
}

/// Column order: id, user_id, title, location, time, description, gender,
/// min_age, max_age, date_label, created_at, host_name.
pub(crate) fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        location: row.get(3)?,
        time: row.get(4)?,
        description: row.get(5)?,
        gender: row.get(6)?,
        min_age: row.get(7)?,
        max_age: row.get(8)?,
        date_label: row.get(9)?,
        created_at: row.get(10)?,
        host_name: row.get(11)?,
    })
}
