use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, SaltString};
use argon2::{Argon2, PasswordVerifier};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use companion_types::models::User;

use crate::models::row_to_user_auth;
use crate::{Result, Store, StoreError};

impl Store {
    /// Insert a user with a pre-computed Argon2 hash. Users are created
    /// out-of-band (seeding, ops tooling); there is no public registration.
    pub fn create_user(&self, name: &str, email: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (name, email, password, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![name, email, password_hash, Utc::now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Verify credentials and return the user.
    ///
    /// Lookup misses and hash mismatches both map to `InvalidCredentials`;
    /// callers are expected to rate-limit at the API edge.
    pub fn authenticate_user(&self, email: &str, password: &str) -> Result<User> {
        let row = self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, name, email, password, created_at FROM users WHERE email = ?1",
                [email],
                row_to_user_auth,
            )
            .optional()
            .map_err(StoreError::from)
        })?;

        let row = row.ok_or(StoreError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&row.password_hash)
            .map_err(|e| StoreError::PasswordHash(e.to_string()))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| StoreError::InvalidCredentials)?;

        Ok(row.into_user())
    }
}

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| StoreError::PasswordHash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticate_verifies_argon2_hash() {
        let store = Store::open_in_memory().unwrap();
        let hash = hash_password("sunset123").unwrap();
        store.create_user("Noah Smith", "noah@example.com", &hash).unwrap();

        let user = store
            .authenticate_user("noah@example.com", "sunset123")
            .unwrap();
        assert_eq!(user.name, "Noah Smith");

        assert!(matches!(
            store.authenticate_user("noah@example.com", "wrong"),
            Err(StoreError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate_user("nobody@example.com", "sunset123"),
            Err(StoreError::InvalidCredentials)
        ));
    }
}
