use chrono::Utc;
use rusqlite::params;

use companion_types::models::Message;

use crate::conversations::member_exists;
use crate::models::row_to_message;
use crate::{Result, Store, StoreError};

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub body: String,
    pub attachment_url: Option<String>,
    pub delivery_status: String,
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, sender_id, body, attachment_url,
        delivery_status, created_at
 FROM messages";

impl Store {
    /// Paginate messages newest-first. Non-positive limits fall back to 20,
    /// negative offsets to 0.
    pub fn list_messages(
        &self,
        conversation_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>> {
        let limit = if limit <= 0 { 20 } else { limit };
        let offset = offset.max(0);

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE}
                 WHERE conversation_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let messages = stmt
                .query_map(params![conversation_id, limit, offset], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
    }

    /// Persist a message and return the stored row for broadcasting.
    ///
    /// The sender's membership is re-checked inside the same transaction as
    /// the insert, so a concurrent removal can never leave a message from a
    /// non-member behind.
    pub fn create_message(&self, params: NewMessage) -> Result<Message> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            if !member_exists(&tx, params.conversation_id, params.sender_id)? {
                return Err(StoreError::NotMember);
            }

            let msg = tx
                .query_row(
                    "INSERT INTO messages
                         (conversation_id, sender_id, body, attachment_url,
                          delivery_status, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     RETURNING id, conversation_id, sender_id, body, attachment_url,
                               delivery_status, created_at",
                    params![
                        params.conversation_id,
                        params.sender_id,
                        params.body,
                        params.attachment_url,
                        params.delivery_status,
                        Utc::now(),
                    ],
                    row_to_message,
                )
                .map_err(StoreError::from)?;

            tx.commit()?;
            Ok(msg)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::plain_user;

    fn send(store: &Store, conversation_id: i64, sender_id: i64, body: &str) -> Result<Message> {
        store.create_message(NewMessage {
            conversation_id,
            sender_id,
            body: body.into(),
            attachment_url: None,
            delivery_status: "sent".into(),
        })
    }

    #[test]
    fn messages_come_back_newest_first() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let convo = store.create_conversation(None, a, &[b], None).unwrap();

        for i in 0..5 {
            send(&store, convo.id, a, &format!("m{i}")).unwrap();
        }

        let messages = store.list_messages(convo.id, 3, 0).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].body, "m4");
        assert_eq!(messages[2].body, "m2");

        let page_two = store.list_messages(convo.id, 3, 3).unwrap();
        assert_eq!(page_two.len(), 2);
        assert_eq!(page_two[0].body, "m1");
    }

    #[test]
    fn limit_and_offset_clamp_to_defaults() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let convo = store.create_conversation(None, a, &[], None).unwrap();

        for i in 0..25 {
            send(&store, convo.id, a, &format!("m{i}")).unwrap();
        }

        // limit <= 0 falls back to 20
        assert_eq!(store.list_messages(convo.id, 0, 0).unwrap().len(), 20);
        assert_eq!(store.list_messages(convo.id, -3, 0).unwrap().len(), 20);
        // offset < 0 treated as 0
        let from_start = store.list_messages(convo.id, 5, -1).unwrap();
        assert_eq!(from_start[0].body, "m24");
    }

    #[test]
    fn non_members_cannot_write() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let outsider = plain_user(&store, "outsider");
        let convo = store.create_conversation(None, a, &[], None).unwrap();

        assert!(matches!(
            send(&store, convo.id, outsider, "sneaky"),
            Err(StoreError::NotMember)
        ));

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                    [convo.id],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn removed_member_cannot_write_anymore() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let b = plain_user(&store, "b");
        let convo = store.create_conversation(None, a, &[b], None).unwrap();

        send(&store, convo.id, b, "while a member").unwrap();

        store
            .with_conn(|conn| {
                conn.execute(
                    "DELETE FROM conversation_members
                     WHERE conversation_id = ?1 AND user_id = ?2",
                    params![convo.id, b],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            send(&store, convo.id, b, "after removal"),
            Err(StoreError::NotMember)
        ));
    }

    #[test]
    fn stored_message_round_trips_fields() {
        let store = Store::open_in_memory().unwrap();
        let a = plain_user(&store, "a");
        let convo = store.create_conversation(None, a, &[], None).unwrap();

        let msg = store
            .create_message(NewMessage {
                conversation_id: convo.id,
                sender_id: a,
                body: "hello".into(),
                attachment_url: Some("https://cdn.example/p.jpg".into()),
                delivery_status: "sent".into(),
            })
            .unwrap();

        assert!(msg.id > 0);
        assert_eq!(msg.conversation_id, convo.id);
        assert_eq!(msg.sender_id, a);
        assert_eq!(msg.attachment_url.as_deref(), Some("https://cdn.example/p.jpg"));
        assert_eq!(msg.delivery_status, "sent");
    }
}
