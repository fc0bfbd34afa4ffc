use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Current schema version. Increment this and add a new migration function
/// to the `MIGRATIONS` array when the schema changes.
const CURRENT_VERSION: u32 = 2;

type MigrationFn = fn(&Connection) -> Result<()>;

/// Ordered list of migrations. Index 0 = version 1, index 1 = version 2, etc.
const MIGRATIONS: &[MigrationFn] = &[migrate_v1, migrate_v2];

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER NOT NULL,
            applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;
    info!(
        "store schema version: {} (latest: {})",
        current, CURRENT_VERSION
    );

    if current >= CURRENT_VERSION {
        return Ok(());
    }

    // Each migration + version bump runs in its own transaction. BEGIN
    // IMMEDIATE takes the write lock up front so concurrent writers cannot
    // interleave; on error the whole migration rolls back.
    for version in (current + 1)..=CURRENT_VERSION {
        let idx = (version - 1) as usize;
        info!("applying migration v{}", version);

        conn.execute_batch("BEGIN IMMEDIATE")?;
        match MIGRATIONS[idx](conn) {
            Ok(()) => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
                conn.execute_batch("COMMIT")?;
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK").ok();
                return Err(StoreError::Migration(format!("v{version} failed: {e}")));
            }
        }
    }

    Ok(())
}

fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Version 1: full base schema.
///
/// Timestamps are written by the application as RFC 3339 text so ordering
/// is lexicographic; no SQL-side defaults.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS events (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            title       TEXT NOT NULL,
            location    TEXT NOT NULL,
            time        TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            gender      TEXT NOT NULL,
            min_age     INTEGER NOT NULL,
            max_age     INTEGER NOT NULL,
            date_label  TEXT NOT NULL CHECK(date_label IN ('Today', 'Tmrw')),
            created_at  TEXT NOT NULL,
            CHECK (min_age >= 0),
            CHECK (max_age >= min_age)
        );

        CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            title       TEXT,
            created_by  INTEGER NOT NULL REFERENCES users(id),
            event_id    INTEGER REFERENCES events(id) ON DELETE CASCADE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS conversation_members (
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            joined_at       TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            sender_id       INTEGER NOT NULL REFERENCES users(id),
            body            TEXT NOT NULL,
            attachment_url  TEXT,
            delivery_status TEXT NOT NULL DEFAULT 'sent',
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS messages_conversation_created_idx
            ON messages (conversation_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS conversation_read_state (
            conversation_id      INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
            user_id              INTEGER NOT NULL REFERENCES users(id),
            last_read_message_id INTEGER NOT NULL,
            updated_at           TEXT NOT NULL,
            PRIMARY KEY (conversation_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS conversation_join_requests (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id    INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL CHECK(status IN ('pending','approved','denied')) DEFAULT 'pending',
            created_at  TEXT NOT NULL,
            decided_at  TEXT,
            decided_by  INTEGER REFERENCES users(id)
        );

        -- At most one pending request per (event, user).
        CREATE UNIQUE INDEX IF NOT EXISTS join_requests_pending_idx
            ON conversation_join_requests(event_id, user_id) WHERE status = 'pending';
        ",
    )?;
    Ok(())
}

/// Version 2: `conversations.event_id` for databases created before event
/// groups existed, plus the one-conversation-per-event index.
/// Inspect-then-alter so the column add is a no-op on schemas that already
/// carry it.
fn migrate_v2(conn: &Connection) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA table_info(conversations)")?;
    let mut has_event_id = false;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == "event_id" {
            has_event_id = true;
            break;
        }
    }
    drop(rows);
    drop(stmt);

    if !has_event_id {
        conn.execute_batch(
            "ALTER TABLE conversations
                 ADD COLUMN event_id INTEGER REFERENCES events(id) ON DELETE CASCADE;",
        )?;
    }

    // At most one conversation per event.
    conn.execute_batch(
        "CREATE UNIQUE INDEX IF NOT EXISTS conversations_event_idx
             ON conversations(event_id) WHERE event_id IS NOT NULL;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), CURRENT_VERSION);
    }

    #[test]
    fn event_id_backfill_survives_legacy_schema() {
        let conn = Connection::open_in_memory().unwrap();
        // A pre-event-groups database: conversations without event_id.
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL, email TEXT NOT NULL UNIQUE,
                password TEXT NOT NULL, created_at TEXT NOT NULL
            );
            CREATE TABLE conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT,
                created_by INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            );",
        )
        .unwrap();

        run(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('conversations') WHERE name = 'event_id'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }
}
