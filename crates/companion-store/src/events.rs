use chrono::Utc;
use rusqlite::params;

use companion_types::models::Event;

use crate::models::row_to_event;
use crate::{Result, Store, StoreError};

#[derive(Debug, Clone)]
pub struct CreateEventParams {
    pub user_id: i64,
    pub title: String,
    pub location: String,
    pub time: String,
    pub description: String,
    pub gender: String,
    pub min_age: i64,
    pub max_age: i64,
    pub date_label: String,
}

const SELECT_EVENT: &str = "
SELECT e.id, e.user_id, e.title, e.location, e.time, e.description, e.gender,
       e.min_age, e.max_age, e.date_label, e.created_at, u.name AS host_name
FROM events e
JOIN users u ON u.id = e.user_id";

impl Store {
    /// Publish an event. The event row, its group conversation, and the
    /// host's owner membership are inserted in one transaction; an event
    /// never exists without its conversation.
    pub fn create_event(&self, params: CreateEventParams) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            tx.execute(
                "INSERT INTO events
                     (user_id, title, location, time, description, gender,
                      min_age, max_age, date_label, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    params.user_id,
                    params.title,
                    params.location,
                    params.time,
                    params.description,
                    params.gender,
                    params.min_age,
                    params.max_age,
                    params.date_label,
                    now,
                ],
            )?;
            let event_id = tx.last_insert_rowid();

            let title = match params.title.trim() {
                "" => None,
                trimmed => Some(trimmed.to_string()),
            };
            tx.execute(
                "INSERT INTO conversations (title, created_by, event_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![title, params.user_id, event_id, now],
            )?;
            let conversation_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT OR IGNORE INTO conversation_members
                     (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'owner', ?3)",
                params![conversation_id, params.user_id, now],
            )?;

            tx.commit()?;
            Ok(event_id)
        })
    }

    pub fn list_events(&self) -> Result<Vec<Event>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("{SELECT_EVENT} ORDER BY e.created_at DESC, e.id DESC"))?;
            let events = stmt
                .query_map([], row_to_event)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(events)
        })
    }

    pub fn get_event_by_id(&self, event_id: i64) -> Result<Event> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("{SELECT_EVENT} WHERE e.id = ?1"),
                [event_id],
                row_to_event,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::EventNotFound,
                other => StoreError::Sqlite(other),
            })
        })
    }

    /// Delete an event owned by `host_id`. Foreign keys cascade to the
    /// conversation, members, messages, read cursors, and join requests.
    pub fn delete_event(&self, event_id: i64, host_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let affected = conn.execute(
                "DELETE FROM events WHERE id = ?1 AND user_id = ?2",
                params![event_id, host_id],
            )?;
            if affected == 0 {
                return Err(StoreError::EventNotFound);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A user plus an event they host, for tests that need the full
    /// event → conversation link.
    pub(crate) fn seed_host_and_event(store: &Store) -> (i64, i64) {
        let host = store
            .create_user("Host", &format!("host{}@example.com", rand_suffix()), "x")
            .unwrap();
        let event_id = store
            .create_event(CreateEventParams {
                user_id: host,
                title: "Trail Hike".into(),
                location: "Howth Cliffs".into(),
                time: "10:00".into(),
                description: "Scenic hike with lunch after.".into(),
                gender: "Any".into(),
                min_age: 18,
                max_age: 40,
                date_label: "Tmrw".into(),
            })
            .unwrap();
        (host, event_id)
    }

    pub(crate) fn plain_user(store: &Store, name: &str) -> i64 {
        store
            .create_user(name, &format!("{name}{}@example.com", rand_suffix()), "x")
            .unwrap()
    }

    /// Cheap uniqueness for emails within a single test database.
    fn rand_suffix() -> u32 {
        use std::sync::atomic::{AtomicU32, Ordering};
        static NEXT: AtomicU32 = AtomicU32::new(0);
        NEXT.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{plain_user, seed_host_and_event};
    use super::*;

    #[test]
    fn create_event_also_creates_owner_conversation() {
        let store = Store::open_in_memory().unwrap();
        let (host, event_id) = seed_host_and_event(&store);

        let convo = store.conversation_by_event(event_id).unwrap();
        assert_eq!(convo.event_id, Some(event_id));
        assert_eq!(convo.created_by, host);
        assert!(store.is_member(convo.id, host).unwrap());
    }

    #[test]
    fn get_event_includes_host_name() {
        let store = Store::open_in_memory().unwrap();
        let (_, event_id) = seed_host_and_event(&store);

        let event = store.get_event_by_id(event_id).unwrap();
        assert_eq!(event.host_name, "Host");
        assert!(matches!(
            store.get_event_by_id(event_id + 100),
            Err(StoreError::EventNotFound)
        ));
    }

    #[test]
    fn delete_event_cascades_to_chat_state() {
        let store = Store::open_in_memory().unwrap();
        let (host, event_id) = seed_host_and_event(&store);
        let guest = plain_user(&store, "guest");

        let convo = store.conversation_by_event(event_id).unwrap();
        store.create_join_request(event_id, guest).unwrap();
        store.approve_join_request(event_id, guest, host).unwrap();
        let msg = store
            .create_message(crate::NewMessage {
                conversation_id: convo.id,
                sender_id: host,
                body: "hello".into(),
                attachment_url: None,
                delivery_status: "sent".into(),
            })
            .unwrap();
        store
            .update_read_cursor(convo.id, guest, msg.id)
            .unwrap();

        // Wrong owner cannot delete.
        assert!(matches!(
            store.delete_event(event_id, guest),
            Err(StoreError::EventNotFound)
        ));

        store.delete_event(event_id, host).unwrap();

        assert!(matches!(
            store.conversation_by_event(event_id),
            Err(StoreError::ConversationNotFound)
        ));
        let leftovers: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    [convo.id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(leftovers, 0);
    }
}
