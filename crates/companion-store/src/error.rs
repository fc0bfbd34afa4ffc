use thiserror::Error;

/// Storage failures, split into domain errors callers branch on and a
/// `Sqlite` catch-all for unexpected backend failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("event not found")]
    EventNotFound,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error("user already a conversation member")]
    AlreadyMember,

    #[error("join request already pending")]
    RequestExists,

    #[error("join request not found")]
    RequestNotFound,

    #[error("user is not the event host")]
    NotHost,

    #[error("event host cannot be removed from the conversation")]
    CannotRemoveHost,

    #[error("user is not a conversation member")]
    NotMember,

    #[error("password hash error: {0}")]
    PasswordHash(String),

    #[error("migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
