use tracing::info;

use crate::events::CreateEventParams;
use crate::messages::NewMessage;
use crate::users::hash_password;
use crate::{Result, Store};

struct SeedUser {
    name: &'static str,
    email: &'static str,
    password: &'static str,
}

const SEED_USERS: &[SeedUser] = &[
    SeedUser {
        name: "Ava Johnson",
        email: "ava@example.com",
        password: "password123",
    },
    SeedUser {
        name: "Liam Patel",
        email: "liam@example.com",
        password: "welcome123",
    },
    SeedUser {
        name: "Sophia Chen",
        email: "sophia@example.com",
        password: "secret123",
    },
    SeedUser {
        name: "Noah Smith",
        email: "noah@example.com",
        password: "sunset123",
    },
];

/// Populate demo data on an empty database. Every section is count-guarded
/// so restarts do not duplicate rows.
pub(crate) fn run(store: &Store) -> Result<()> {
    let users = seed_users(store)?;
    seed_events(store, &users)?;
    seed_direct_and_group_chats(store, &users)?;
    Ok(())
}

fn seed_users(store: &Store) -> Result<Vec<i64>> {
    let existing = count(store, "SELECT COUNT(1) FROM users")?;
    if existing > 0 {
        return store.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM users ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        });
    }

    info!("seeding {} demo users", SEED_USERS.len());
    let mut ids = Vec::with_capacity(SEED_USERS.len());
    for user in SEED_USERS {
        let hash = hash_password(user.password)?;
        ids.push(store.create_user(user.name, user.email, &hash)?);
    }
    Ok(ids)
}

fn seed_events(store: &Store, users: &[i64]) -> Result<()> {
    if users.is_empty() || count(store, "SELECT COUNT(1) FROM events")? > 0 {
        return Ok(());
    }

    let host = |idx: usize| users[idx % users.len()];
    let events = [
        CreateEventParams {
            user_id: host(0),
            title: "Running Buddy".into(),
            location: "Phoenix Park".into(),
            time: "09:00".into(),
            description: "Morning run followed by coffee.".into(),
            gender: "Any".into(),
            min_age: 20,
            max_age: 30,
            date_label: "Today".into(),
        },
        CreateEventParams {
            user_id: host(1),
            title: "Live Music Night".into(),
            location: "Workmans Club".into(),
            time: "20:00".into(),
            description: "Indie bands and craft beers.".into(),
            gender: "Female".into(),
            min_age: 22,
            max_age: 32,
            date_label: "Today".into(),
        },
        CreateEventParams {
            user_id: host(2),
            title: "Trail Hike".into(),
            location: "Howth Cliffs".into(),
            time: "10:00".into(),
            description: "Scenic hike with lunch after.".into(),
            gender: "Any".into(),
            min_age: 18,
            max_age: 40,
            date_label: "Tmrw".into(),
        },
    ];

    info!("seeding {} demo events", events.len());
    for event in events {
        store.create_event(event)?;
    }
    Ok(())
}

fn seed_direct_and_group_chats(store: &Store, users: &[i64]) -> Result<()> {
    if users.len() < 2 {
        return Ok(());
    }
    let existing = count(
        store,
        "SELECT COUNT(1) FROM conversations WHERE event_id IS NULL",
    )?;
    if existing > 0 {
        return Ok(());
    }

    info!("seeding demo conversations");

    let openers = [
        "Hey there! Want to sync up later?",
        "Looking forward to catching up soon.",
        "Should we plan something fun tonight?",
    ];

    let mut opener = 0usize;
    for i in 0..users.len() {
        for j in (i + 1)..users.len() {
            let convo = store.create_conversation(None, users[i], &[users[j]], None)?;
            store.create_message(NewMessage {
                conversation_id: convo.id,
                sender_id: users[i],
                body: openers[opener % openers.len()].into(),
                attachment_url: None,
                delivery_status: "sent".into(),
            })?;
            opener += 1;
            let reply = store.create_message(NewMessage {
                conversation_id: convo.id,
                sender_id: users[j],
                body: "Count me in.".into(),
                attachment_url: None,
                delivery_status: "sent".into(),
            })?;
            store.update_read_cursor(convo.id, users[i], reply.id)?;
            store.update_read_cursor(convo.id, users[j], reply.id)?;
        }
    }

    if users.len() >= 3 {
        let members = [users[1], users[2]];
        let convo =
            store.create_conversation(Some("Planning Crew"), users[0], &members, None)?;
        let scripted = [
            (users[0], "Team, let's sync here about weekend ideas."),
            (users[1], "Love it. How about a hike followed by brunch?"),
            (users[2], "Count me in! I can book a table if we pick a spot."),
        ];
        let mut last_id = 0;
        for (sender, body) in scripted {
            let msg = store.create_message(NewMessage {
                conversation_id: convo.id,
                sender_id: sender,
                body: body.into(),
                attachment_url: None,
                delivery_status: "sent".into(),
            })?;
            last_id = msg.id;
        }
        for member in [users[0], users[1], users[2]] {
            store.update_read_cursor(convo.id, member, last_id)?;
        }
    }

    Ok(())
}

fn count(store: &Store, sql: &str) -> Result<i64> {
    store.with_conn(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeding_twice_does_not_duplicate() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_seed_data().unwrap();

        let users = count(&store, "SELECT COUNT(1) FROM users").unwrap();
        let events = count(&store, "SELECT COUNT(1) FROM events").unwrap();
        let conversations = count(&store, "SELECT COUNT(1) FROM conversations").unwrap();
        assert!(users > 0 && events > 0 && conversations > 0);

        store.ensure_seed_data().unwrap();
        assert_eq!(count(&store, "SELECT COUNT(1) FROM users").unwrap(), users);
        assert_eq!(count(&store, "SELECT COUNT(1) FROM events").unwrap(), events);
        assert_eq!(
            count(&store, "SELECT COUNT(1) FROM conversations").unwrap(),
            conversations
        );
    }

    #[test]
    fn seeded_users_can_log_in() {
        let store = Store::open_in_memory().unwrap();
        store.ensure_seed_data().unwrap();

        let user = store
            .authenticate_user("ava@example.com", "password123")
            .unwrap();
        assert_eq!(user.name, "Ava Johnson");
    }
}
