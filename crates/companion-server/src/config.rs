use std::path::PathBuf;

use tracing::warn;

/// Fallback secret for local development only.
const DEV_FALLBACK_SECRET: &str = "local-dev-secret";

#[derive(Debug, Clone)]
pub struct Config {
    pub session_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let session_secret = match std::env::var("CHAT_SESSION_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret.trim().to_string(),
            _ => {
                warn!("CHAT_SESSION_SECRET not set; using development fallback secret");
                DEV_FALLBACK_SECRET.to_string()
            }
        };

        let db_path = std::env::var("CHAT_DB_PATH")
            .unwrap_or_else(|_| "companion.db".into())
            .into();
        let host = std::env::var("CHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("CHAT_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()?;

        Ok(Self {
            session_secret,
            db_path,
            host,
            port,
        })
    }
}
