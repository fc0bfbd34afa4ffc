pub mod authz;
pub mod error;
mod conversations;
mod events;
mod join_requests;
mod messages;
mod migrations;
mod models;
mod seed;
mod users;

pub use error::{Result, StoreError};
pub use events::CreateEventParams;
pub use messages::NewMessage;
pub use users::hash_password;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use tracing::info;

/// Single-connection SQLite wrapper.
///
/// Uses `Mutex` because `rusqlite::Connection` is `Send` but not `Sync`, so
/// all access is serialized through the lock, which also gives the
/// single-writer semantics the rest of the system assumes. WAL mode is set
/// for crash safety and to keep the door open for a reader/writer pool
/// later.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path))
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Writers retry for up to 5s instead of failing on SQLITE_BUSY.
        conn.pragma_update(None, "busy_timeout", 5000)?;

        migrations::run(&conn)?;

        if let Some(path) = path {
            info!("store opened at {}", path.display());
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection for read-only queries (SELECT).
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    /// Acquire the connection mutably for transactional writes.
    pub(crate) fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&mut conn)
    }

    /// Populate demo users, events, and conversations on first run.
    pub fn ensure_seed_data(&self) -> Result<()> {
        seed::run(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reopening_a_database_preserves_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companion.db");

        let (user_id, conversation_id) = {
            let store = Store::open(&path).unwrap();
            let user_id = store.create_user("Ava", "ava@example.com", "x").unwrap();
            let conversation = store
                .create_conversation(Some("Trip"), user_id, &[], None)
                .unwrap();
            (user_id, conversation.id)
        };

        let store = Store::open(&path).unwrap();
        assert!(store.is_member(conversation_id, user_id).unwrap());
        let summaries = store.list_conversations_for_user(user_id).unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].conversation.title.as_deref(), Some("Trip"));
    }
}
