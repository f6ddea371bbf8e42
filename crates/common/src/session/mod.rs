//! Encrypted, cookie-addressed sessions
//!
//! A session's values live server-side in the sessions bucket, encrypted
//! under a key derived from the configured signing key. The client only
//! ever holds an authenticated, encrypted token naming the session id.
//!
//! Lifecycle: a request without a usable cookie gets a new session; saving
//! it writes the record and sets the cookie; saving with `max_age <= 0`
//! destroys it. Records past their expiry are removed by
//! [`SessionStore::sweep_expired`], usually driven by a [`Sweeper`].

mod codec;
mod store;
mod sweeper;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use crate::crypto::SecretError;
use crate::db::DbError;

pub use codec::{CookieCodec, CookieToken, COOKIE_KEY_CONTEXT};
pub use store::{SessionStore, VALUES_KEY_CONTEXT};
pub use sweeper::{run_sweeper, Sweeper};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("session record could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session crypto failure: {0}")]
    Crypto(#[from] SecretError),

    #[error("invalid session cookie: {0}")]
    Cookie(String),
}

/// A value stored in a session
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SessionValue {
    String(String),
    Integer(i64),
    Bool(bool),
    Bytes(#[serde_as(as = "Base64")] Vec<u8>),
}

impl SessionValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SessionValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SessionValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SessionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SessionValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for SessionValue {
    fn from(value: &str) -> Self {
        SessionValue::String(value.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(value: String) -> Self {
        SessionValue::String(value)
    }
}

impl From<i64> for SessionValue {
    fn from(value: i64) -> Self {
        SessionValue::Integer(value)
    }
}

impl From<bool> for SessionValue {
    fn from(value: bool) -> Self {
        SessionValue::Bool(value)
    }
}

impl From<Vec<u8>> for SessionValue {
    fn from(value: Vec<u8>) -> Self {
        SessionValue::Bytes(value)
    }
}

/// Server-side state for one client
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) id: Option<String>,
    pub(crate) name: String,
    pub values: BTreeMap<String, SessionValue>,
    /// Lifetime in seconds applied on the next save; `<= 0` destroys
    pub max_age: i64,
    pub(crate) is_new: bool,
    pub(crate) created_at: Option<DateTime<Utc>>,
    pub(crate) expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub(crate) fn new(name: &str, max_age: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            values: BTreeMap::new(),
            max_age,
            is_new: true,
            created_at: None,
            expires_at: None,
        }
    }

    /// Storage id; `None` until the session is first saved
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Cookie name the session is addressed by
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the session has been saved or loaded from a cookie
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn get(&self, key: &str) -> Option<&SessionValue> {
        self.values.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SessionValue>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<SessionValue> {
        self.values.remove(key)
    }

    /// Mark the session for deletion on the next save (logout)
    pub fn destroy(&mut self) {
        self.max_age = 0;
    }
}

/// Get / New / Save contract consumed by request handlers
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// The session named by the request's cookie, or a new one when the
    /// cookie is missing, invalid, expired or unknown. Never fails.
    async fn get(&self, request: &HeaderMap, name: &str) -> Session;

    /// A new, empty session. Does not touch storage.
    async fn new(&self, request: &HeaderMap, name: &str) -> Session;

    /// Persist the session and append its `Set-Cookie` header, or delete it
    /// when `max_age <= 0`
    async fn save(
        &self,
        request: &HeaderMap,
        response: &mut HeaderMap,
        session: &mut Session,
    ) -> Result<(), SessionError>;
}
