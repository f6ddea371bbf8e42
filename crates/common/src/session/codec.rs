use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::config::SigningKey;
use crate::crypto::Secret;

use super::SessionError;

/// Key derivation context for the cookie encryption key
pub const COOKIE_KEY_CONTEXT: &str = "aurora session cookie v1";

const ISSUED_AT_LEN: usize = 8;
const MAX_AGE_LEN: usize = 8;
const HEADER_LEN: usize = ISSUED_AT_LEN + MAX_AGE_LEN;

/// What a valid session cookie carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieToken {
    pub id: String,
    pub issued_at: DateTime<Utc>,
    /// Lifetime in seconds the session was saved with
    pub max_age: i64,
}

/// Seals session ids into opaque cookie values
///
/// Layout of a cookie value, before base64url (no padding):
///
/// ```text
/// nonce (12) | ChaCha20-Poly1305( issued_at: u64 BE | max_age: u64 BE | id ) | tag (16)
/// ```
///
/// The cookie name is the associated data, so a value minted for one cookie
/// name does not open under another.
#[derive(Debug, Clone)]
pub struct CookieCodec {
    secret: Secret,
}

impl CookieCodec {
    pub fn new(signing_key: &SigningKey) -> Self {
        Self {
            secret: Secret::derive(COOKIE_KEY_CONTEXT, signing_key.as_bytes()),
        }
    }

    pub fn encode(
        &self,
        name: &str,
        id: &str,
        issued_at: DateTime<Utc>,
        max_age: i64,
    ) -> Result<String, SessionError> {
        let issued_at = u64::try_from(issued_at.timestamp()).unwrap_or_default();
        let max_age = u64::try_from(max_age).unwrap_or_default();

        let mut plain = Vec::with_capacity(HEADER_LEN + id.len());
        plain.extend_from_slice(&issued_at.to_be_bytes());
        plain.extend_from_slice(&max_age.to_be_bytes());
        plain.extend_from_slice(id.as_bytes());

        let sealed = self.secret.encrypt(&plain, name.as_bytes())?;
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a cookie value
    ///
    /// Fails with [`SessionError::Cookie`] for malformed input and
    /// [`SessionError::Crypto`] when authentication fails.
    pub fn decode(&self, name: &str, value: &str) -> Result<CookieToken, SessionError> {
        let sealed = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|e| SessionError::Cookie(format!("cookie is not base64url: {}", e)))?;
        let plain = self.secret.decrypt(&sealed, name.as_bytes())?;

        if plain.len() <= HEADER_LEN {
            return Err(SessionError::Cookie("cookie token is too short".to_string()));
        }
        let (header, id) = plain.split_at(HEADER_LEN);
        let (issued_at, max_age) = header.split_at(ISSUED_AT_LEN);

        let issued_at = read_i64(issued_at)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or_else(|| SessionError::Cookie("cookie timestamp out of range".to_string()))?;
        let max_age = read_i64(max_age)
            .ok_or_else(|| SessionError::Cookie("cookie max age out of range".to_string()))?;
        let id = String::from_utf8(id.to_vec())
            .map_err(|_| SessionError::Cookie("session id is not utf-8".to_string()))?;

        Ok(CookieToken {
            id,
            issued_at,
            max_age,
        })
    }
}

fn read_i64(bytes: &[u8]) -> Option<i64> {
    let raw = u64::from_be_bytes(<[u8; 8]>::try_from(bytes).ok()?);
    i64::try_from(raw).ok()
}
