use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// How long issued session tokens remain valid.
const SESSION_TTL_HOURS: i64 = 12;

/// Claims serialized into the token payload so both the REST and WebSocket
/// layers can identify the caller without touching the database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionClaims {
    pub user_id: i64,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed session token")]
    Malformed,
    #[error("invalid session token signature")]
    BadSignature,
    #[error("session token expired")]
    Expired,
}

/// HMAC-based signer/validator for opaque session tokens.
///
/// Token format: `base64url(claims-json) "." base64url(hmac-sha256)`, both
/// halves unpadded. Not a JWT; there is no header part.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::hours(SESSION_TTL_HOURS),
        }
    }

    #[cfg(test)]
    fn with_ttl(secret: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl,
        }
    }

    /// Create a signed token for the user; returns the opaque token string
    /// and the structured claims for convenience.
    pub fn issue(
        &self,
        user_id: i64,
        email: &str,
    ) -> Result<(String, SessionClaims), serde_json::Error> {
        let now = Utc::now();
        let claims = SessionClaims {
            user_id,
            email: email.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature = self.sign(payload.as_bytes());
        Ok((format!("{payload}.{signature}"), claims))
    }

    /// Check structure, signature, and expiry, and rebuild the claims.
    ///
    /// Expiry is strict: a token whose `expires_at` is in the past is
    /// rejected with no clock-skew allowance.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(TokenError::Malformed)?;
        if signature.contains('.') {
            return Err(TokenError::Malformed);
        }

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::BadSignature)?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        // Constant-time comparison.
        mac.verify_slice(&provided)
            .map_err(|_| TokenError::BadSignature)?;

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| TokenError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::Malformed)?;

        if Utc::now() > claims.expires_at {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(payload);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}
