use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use companion_types::models::{
    Conversation, ConversationEventMeta, ConversationParticipant, ConversationSummary,
    MessageSummary,
};

use crate::models::row_to_conversation;
use crate::{Result, Store, StoreError};

const SELECT_CONVERSATION: &str =
    "SELECT id, title, created_by, created_at, event_id FROM conversations";

impl Store {
    /// Create a conversation and enroll `member_ids ∪ {created_by}` in one
    /// transaction. The creator gets role `owner`, everyone else `member`.
    pub fn create_conversation(
        &self,
        title: Option<&str>,
        created_by: i64,
        member_ids: &[i64],
        event_id: Option<i64>,
    ) -> Result<Conversation> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = Utc::now();

            tx.execute(
                "INSERT INTO conversations (title, created_by, event_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![title, created_by, event_id, now],
            )?;
            let conversation_id = tx.last_insert_rowid();

            // INSERT OR IGNORE deduplicates repeated ids in the request.
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO conversation_members
                     (conversation_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            insert.execute(params![conversation_id, created_by, "owner", now])?;
            for member_id in member_ids {
                if *member_id == created_by {
                    continue;
                }
                insert.execute(params![conversation_id, member_id, "member", now])?;
            }
            drop(insert);

            tx.commit()?;

            conn.query_row(
                &format!("{SELECT_CONVERSATION} WHERE id = ?1"),
                [conversation_id],
                row_to_conversation,
            )
            .map_err(StoreError::from)
        })
    }

    pub fn conversation_by_event(&self, event_id: i64) -> Result<Conversation> {
        self.with_conn(|conn| fetch_conversation_by_event(conn, event_id))
    }

    /// Membership check. Side-effect free; the send path calls this on every
    /// frame so removals take effect immediately.
    pub fn is_member(&self, conversation_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let hit = conn
                .query_row(
                    "SELECT 1 FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2 LIMIT 1",
                    params![conversation_id, user_id],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    /// All conversations visible to `user_id`, newest first, each hydrated
    /// with participants, newest message, unread count, and event metadata.
    pub fn list_conversations_for_user(&self, user_id: i64) -> Result<Vec<ConversationSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CONVERSATION} c
                 WHERE EXISTS (
                     SELECT 1 FROM conversation_members cm
                     WHERE cm.conversation_id = c.id AND cm.user_id = ?1
                 )
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let conversations = stmt
                .query_map([user_id], row_to_conversation)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            conversations
                .into_iter()
                .map(|convo| hydrate_summary(conn, convo, user_id))
                .collect()
        })
    }

    /// Hydrate a single conversation for a viewer (used by the create
    /// endpoint to respond with the same shape as the listing).
    pub fn summarize_conversation(
        &self,
        conversation: Conversation,
        viewer_id: i64,
    ) -> Result<ConversationSummary> {
        self.with_conn(|conn| hydrate_summary(conn, conversation, viewer_id))
    }

    /// Advance a user's read cursor. No-op for non-positive ids; an existing
    /// cursor never regresses (the upsert keeps the max).
    pub fn update_read_cursor(
        &self,
        conversation_id: i64,
        user_id: i64,
        last_read_message_id: i64,
    ) -> Result<()> {
        if last_read_message_id <= 0 {
            return Ok(());
        }
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation_read_state
                     (conversation_id, user_id, last_read_message_id, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(conversation_id, user_id)
                 DO UPDATE SET
                     last_read_message_id =
                         MAX(last_read_message_id, excluded.last_read_message_id),
                     updated_at = excluded.updated_at",
                params![conversation_id, user_id, last_read_message_id, Utc::now()],
            )?;
            Ok(())
        })
    }
}

pub(crate) fn fetch_conversation_by_event(
    conn: &Connection,
    event_id: i64,
) -> Result<Conversation> {
    conn.query_row(
        &format!("{SELECT_CONVERSATION} WHERE event_id = ?1 LIMIT 1"),
        [event_id],
        row_to_conversation,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::ConversationNotFound,
        other => StoreError::Sqlite(other),
    })
}

pub(crate) fn member_exists(conn: &Connection, conversation_id: i64, user_id: i64) -> Result<bool> {
    let hit = conn
        .query_row(
            "SELECT 1 FROM conversation_members
             WHERE conversation_id = ?1 AND user_id = ?2 LIMIT 1",
            params![conversation_id, user_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn hydrate_summary(
    conn: &Connection,
    conversation: Conversation,
    viewer_id: i64,
) -> Result<ConversationSummary> {
    let (participants, member_ids) = fetch_participants(conn, conversation.id)?;
    let last_message = fetch_latest_message(conn, conversation.id)?;
    let unread_count = count_unread(conn, conversation.id, viewer_id, last_message.as_ref())?;

    let event = match conversation.event_id {
        Some(event_id) => fetch_event_meta(conn, event_id)?,
        None => None,
    };

    Ok(ConversationSummary {
        conversation,
        member_ids,
        participants,
        event,
        last_message,
        unread_count,
    })
}

/// Participants in join order, plus the bare id list for fast lookups.
fn fetch_participants(
    conn: &Connection,
    conversation_id: i64,
) -> Result<(Vec<ConversationParticipant>, Vec<i64>)> {
    let mut stmt = conn.prepare(
        "SELECT cm.user_id, u.name
         FROM conversation_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.conversation_id = ?1
         ORDER BY cm.joined_at ASC, cm.user_id ASC",
    )?;
    let participants = stmt
        .query_map([conversation_id], |row| {
            Ok(ConversationParticipant {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let member_ids = participants.iter().map(|p| p.id).collect();
    Ok((participants, member_ids))
}

fn fetch_latest_message(
    conn: &Connection,
    conversation_id: i64,
) -> Result<Option<MessageSummary>> {
    let summary = conn
        .query_row(
            "SELECT id, sender_id, body, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT 1",
            [conversation_id],
            |row| {
                Ok(MessageSummary {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    body: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(summary)
}

/// Unread = messages with id above the viewer's cursor (0 when absent).
/// The newest-message shortcut skips the count when the cursor is caught up.
fn count_unread(
    conn: &Connection,
    conversation_id: i64,
    user_id: i64,
    last_message: Option<&MessageSummary>,
) -> Result<i64> {
    let Some(last_message) = last_message else {
        return Ok(0);
    };

    let cursor: Option<i64> = conn
        .query_row(
            "SELECT last_read_message_id FROM conversation_read_state
             WHERE conversation_id = ?1 AND user_id = ?2",
            params![conversation_id, user_id],
            |row| row.get(0),
        )
        .optional()?;

    let threshold = cursor.unwrap_or(0);
    if threshold >= last_message.id {
        return Ok(0);
    }

    let count = conn.query_row(
        "SELECT COUNT(1) FROM messages WHERE conversation_id = ?1 AND id > ?2",
        params![conversation_id, threshold],
        |row| row.get(0),
    )?;
    Ok(count)
}

fn fetch_event_meta(conn: &Connection, event_id: i64) -> Result<Option<ConversationEventMeta>> {
    let meta = conn
        .query_row(
            "SELECT id, title, location, time, date_label FROM events WHERE id = ?1",
            [event_id],
            |row| {
                Ok(ConversationEventMeta {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    location: row.get(2)?,
                    time: row.get(3)?,
                    date_label: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::{plain_user, seed_host_and_event};
    use crate::NewMessage;

    fn message(store: &Store, conversation_id: i64, sender_id: i64, body: &str) -> i64 {
        store
            .create_message(NewMessage {
                conversation_id,
                sender_id,
                body: body.into(),
                attachment_url: None,
                delivery_status: "sent".into(),
            })
            .unwrap()
            .id
    }

    #[test]
    fn create_conversation_dedupes_members_and_marks_owner() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");

        let convo = store
            .create_conversation(Some("Trip"), a, &[a, b, b], None)
            .unwrap();
        assert_eq!(convo.title.as_deref(), Some("Trip"));

        let summary = store.summarize_conversation(convo.clone(), a).unwrap();
        assert_eq!(summary.member_ids.len(), 2);

        let owner_role: String = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT role FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![convo.id, a],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(owner_role, "owner");
    }

    #[test]
    fn listing_is_scoped_to_membership_and_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let c = plain_user(&store, "c");

        let first = store.create_conversation(None, a, &[b], None).unwrap();
        let second = store.create_conversation(None, a, &[c], None).unwrap();

        let for_a = store.list_conversations_for_user(a).unwrap();
        assert_eq!(for_a.len(), 2);
        // created_at ties broken by id, newest first
        assert_eq!(for_a[0].conversation.id, second.id);
        assert_eq!(for_a[1].conversation.id, first.id);

        let for_c = store.list_conversations_for_user(c).unwrap();
        assert_eq!(for_c.len(), 1);
        assert_eq!(for_c[0].conversation.id, second.id);
    }

    #[test]
    fn unread_counts_follow_the_cursor() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let convo = store.create_conversation(None, a, &[b], None).unwrap();

        assert_eq!(
            store.list_conversations_for_user(b).unwrap()[0].unread_count,
            0
        );

        let first = message(&store, convo.id, a, "one");
        message(&store, convo.id, a, "two");
        message(&store, convo.id, a, "three");

        assert_eq!(
            store.list_conversations_for_user(b).unwrap()[0].unread_count,
            3
        );

        store.update_read_cursor(convo.id, b, first).unwrap();
        assert_eq!(
            store.list_conversations_for_user(b).unwrap()[0].unread_count,
            2
        );
    }

    #[test]
    fn read_cursor_never_regresses_and_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let convo = store.create_conversation(None, a, &[b], None).unwrap();

        message(&store, convo.id, a, "one");
        let second = message(&store, convo.id, a, "two");

        store.update_read_cursor(convo.id, b, second).unwrap();
        // Regression attempt is a no-op.
        store.update_read_cursor(convo.id, b, second - 1).unwrap();
        // Repeat of the same value is a no-op too.
        store.update_read_cursor(convo.id, b, second).unwrap();
        // Non-positive ids are ignored entirely.
        store.update_read_cursor(convo.id, b, 0).unwrap();

        let cursor: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT last_read_message_id FROM conversation_read_state
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![convo.id, b],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(cursor, second);

        assert_eq!(
            store.list_conversations_for_user(b).unwrap()[0].unread_count,
            0
        );
    }

    #[test]
    fn event_conversations_carry_event_metadata() {
        let store = Store::open_in_memory().unwrap();
        let (host, event_id) = seed_host_and_event(&store);

        let summaries = store.list_conversations_for_user(host).unwrap();
        assert_eq!(summaries.len(), 1);
        let event = summaries[0].event.as_ref().expect("event meta");
        assert_eq!(event.id, event_id);
        assert_eq!(event.location, "Howth Cliffs");
        assert_eq!(event.date_label, "Tmrw");
    }

    #[test]
    fn participants_are_listed_in_join_order() {
        let store = Store::open_in_memory().unwrap();
        let (host, event_id) = seed_host_and_event(&store);
        let late_joiner = plain_user(&store, "late");

        store.create_join_request(event_id, late_joiner).unwrap();
        store
            .approve_join_request(event_id, late_joiner, host)
            .unwrap();

        let summary = &store.list_conversations_for_user(host).unwrap()[0];
        assert_eq!(summary.member_ids, vec![host, late_joiner]);
        assert_eq!(summary.participants[0].name, "Host");
        assert_eq!(summary.participants[1].name, "late");
    }

    #[test]
    fn last_message_preview_tracks_newest() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let convo = store.create_conversation(None, a, &[b], None).unwrap();

        message(&store, convo.id, a, "first");
        let newest = message(&store, convo.id, b, "latest");

        let summary = &store.list_conversations_for_user(a).unwrap()[0];
        let preview = summary.last_message.as_ref().expect("preview");
        assert_eq!(preview.id, newest);
        assert_eq!(preview.body, "latest");
        assert_eq!(preview.sender_id, b);
    }
}
