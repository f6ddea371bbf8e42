use std::collections::BTreeMap;

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite as CookieSameSite};
use chrono::{DateTime, TimeDelta, Utc};
use http::header::SET_COOKIE;
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_with::base64::Base64;
use serde_with::serde_as;

use crate::config::{CookieOptions, SameSite, StoreConfig, MIN_SIGNING_KEY_LEN};
use crate::crypto::{random_bytes, Secret};
use crate::db::Db;

use super::{CookieCodec, Session, SessionError, SessionManager, SessionValue};

/// Key derivation context for the session values key
pub const VALUES_KEY_CONTEXT: &str = "aurora session values v1";

const RECORD_VERSION: u32 = 1;
const SESSION_ID_BYTES: usize = 32;

fn record_version() -> u32 {
    RECORD_VERSION
}

/// A session as persisted in the sessions bucket, keyed by `id`
#[serde_as]
#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default = "record_version")]
    version: u32,
    id: String,
    /// nonce | ciphertext | tag of the JSON-encoded values
    #[serde_as(as = "Base64")]
    values: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Just enough of a record to decide whether it has expired
#[derive(Deserialize)]
struct ExpiryProbe {
    expires_at: DateTime<Utc>,
}

/// Records that cannot even be probed never load again, so they count as
/// expired
fn is_expired(raw: &[u8], now: DateTime<Utc>) -> bool {
    match serde_json::from_slice::<ExpiryProbe>(raw) {
        Ok(probe) => probe.expires_at <= now,
        Err(_) => true,
    }
}

fn new_session_id() -> Result<String, SessionError> {
    Ok(hex::encode(random_bytes::<SESSION_ID_BYTES>()?))
}

fn lifetime(max_age: i64) -> Result<TimeDelta, SessionError> {
    TimeDelta::try_seconds(max_age)
        .ok_or_else(|| SessionError::Configuration("session max age out of range".to_string()))
}

/// Session store backed by a bucket in a [`Db`]
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Db,
    bucket: String,
    codec: CookieCodec,
    values_key: Secret,
    max_age: i64,
    cookie: CookieOptions,
    sweep_batch_size: usize,
}

impl SessionStore {
    /// Build a store over `db` using the session settings of `config`
    ///
    /// # Errors
    ///
    /// [`SessionError::Configuration`] for an empty bucket name or a signing
    /// key shorter than [`MIN_SIGNING_KEY_LEN`] bytes.
    pub fn from_config(db: Db, config: &StoreConfig) -> Result<Self, SessionError> {
        if config.sessions_bucket.trim().is_empty() {
            return Err(SessionError::Configuration(
                "sessions bucket name is empty".to_string(),
            ));
        }
        let key = &config.session_signing_key;
        if key.len() < MIN_SIGNING_KEY_LEN {
            return Err(SessionError::Configuration(format!(
                "session signing key must be at least {} bytes",
                MIN_SIGNING_KEY_LEN
            )));
        }

        Ok(Self {
            db,
            bucket: config.sessions_bucket.clone(),
            codec: CookieCodec::new(key),
            values_key: Secret::derive(VALUES_KEY_CONTEXT, key.as_bytes()),
            max_age: config.session_max_age,
            cookie: config.session_cookie.clone(),
            sweep_batch_size: config.sweep_batch_size.max(1),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    /// Resolve the request's cookie to a stored, unexpired session
    ///
    /// `Ok(None)` covers every way a cookie can fail to name a live session.
    /// Only storage failures are errors.
    async fn load(&self, request: &HeaderMap, name: &str) -> Result<Option<Session>, SessionError> {
        let jar = CookieJar::from_headers(request);
        let Some(cookie) = jar.get(name) else {
            return Ok(None);
        };

        let token = match self.codec.decode(name, cookie.value()) {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!(session = name, error = %e, "rejected session cookie");
                return Ok(None);
            }
        };

        let now = Utc::now();
        let cookie_age = now.signed_duration_since(token.issued_at);
        if token.max_age <= 0 || cookie_age > lifetime(token.max_age)? {
            tracing::debug!(session = name, "session cookie is older than max age");
            return Ok(None);
        }

        let Some(raw) = self.db.get(&self.bucket, token.id.as_bytes()).await? else {
            tracing::debug!(session = name, "session record not found");
            return Ok(None);
        };

        let record: SessionRecord = match serde_json::from_slice(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(session = name, error = %e, "undecodable session record");
                return Ok(None);
            }
        };
        if record.id != token.id || record.expires_at <= now {
            return Ok(None);
        }

        let values = match self
            .values_key
            .decrypt(&record.values, record.id.as_bytes())
            .map_err(SessionError::from)
            .and_then(|plain| {
                Ok(serde_json::from_slice::<BTreeMap<String, SessionValue>>(&plain)?)
            })
        {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!(session = name, error = %e, "session values could not be opened");
                return Ok(None);
            }
        };

        Ok(Some(Session {
            id: Some(record.id),
            name: name.to_string(),
            values,
            max_age: token.max_age,
            is_new: false,
            created_at: Some(record.created_at),
            expires_at: Some(record.expires_at),
        }))
    }

    /// Remove a session record; absent ids are not an error
    pub async fn delete(&self, id: &str) -> Result<(), SessionError> {
        self.db.delete(&self.bucket, id.as_bytes()).await?;
        Ok(())
    }

    /// Delete every record whose `expires_at` is at or before `now`
    ///
    /// One read scan collects candidates, then they are deleted in write
    /// transactions of at most `sweep_batch_size` records. Each candidate is
    /// re-read inside its transaction and kept if it was saved again since
    /// the scan. Returns the number of records removed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut candidates: Vec<Vec<u8>> = Vec::new();
        self.db
            .for_each(&self.bucket, |key, value| {
                if is_expired(value, now) {
                    candidates.push(key.to_vec());
                }
                true
            })
            .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let mut removed = 0;
        for batch in candidates.chunks(self.sweep_batch_size) {
            let mut tx = self.db.begin_write().await?;
            for key in batch {
                let still_expired = tx
                    .get(&self.bucket, key)
                    .await?
                    .is_some_and(|raw| is_expired(&raw, now));
                if still_expired {
                    tx.delete(&self.bucket, key).await?;
                    removed += 1;
                }
            }
            tx.commit().await?;
        }

        tracing::info!(
            bucket = %self.bucket,
            removed,
            scanned = candidates.len(),
            "swept expired sessions"
        );
        Ok(removed)
    }

    fn build_cookie(&self, name: &str, value: String, max_age: i64) -> Cookie<'static> {
        let mut builder = Cookie::build((name.to_string(), value))
            .path(self.cookie.path.clone())
            .http_only(self.cookie.http_only)
            .secure(self.cookie.secure)
            .same_site(match self.cookie.same_site {
                SameSite::Strict => CookieSameSite::Strict,
                SameSite::Lax => CookieSameSite::Lax,
                SameSite::None => CookieSameSite::None,
            })
            .max_age(time::Duration::seconds(max_age.max(0)));

        if max_age <= 0 {
            builder = builder.expires(time::OffsetDateTime::UNIX_EPOCH);
        } else if let Some(expires) = time::OffsetDateTime::now_utc()
            .checked_add(time::Duration::seconds(max_age))
        {
            builder = builder.expires(expires);
        }
        if let Some(domain) = &self.cookie.domain {
            builder = builder.domain(domain.clone());
        }
        builder.build()
    }

    fn append_cookie(&self, response: &mut HeaderMap, cookie: Cookie<'static>) -> Result<(), SessionError> {
        let header = HeaderValue::from_str(&cookie.to_string())
            .map_err(|e| SessionError::Cookie(format!("cannot encode Set-Cookie header: {}", e)))?;
        response.append(SET_COOKIE, header);
        Ok(())
    }
}

#[async_trait]
impl SessionManager for SessionStore {
    async fn get(&self, request: &HeaderMap, name: &str) -> Session {
        match self.load(request, name).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(name, self.max_age),
            Err(e) => {
                tracing::warn!(session = name, error = %e, "failed to load session, starting a new one");
                Session::new(name, self.max_age)
            }
        }
    }

    async fn new(&self, _request: &HeaderMap, name: &str) -> Session {
        Session::new(name, self.max_age)
    }

    async fn save(
        &self,
        _request: &HeaderMap,
        response: &mut HeaderMap,
        session: &mut Session,
    ) -> Result<(), SessionError> {
        if session.max_age <= 0 {
            if let Some(id) = session.id.take() {
                self.delete(&id).await?;
                tracing::debug!(session = %session.name, "session destroyed");
            }
            session.values.clear();
            session.created_at = None;
            session.expires_at = None;
            let cookie = self.build_cookie(&session.name, String::new(), 0);
            return self.append_cookie(response, cookie);
        }

        let id = match &session.id {
            Some(id) => id.clone(),
            None => new_session_id()?,
        };
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(lifetime(session.max_age)?)
            .ok_or_else(|| SessionError::Configuration("session expiry out of range".to_string()))?;
        let created_at = session.created_at.unwrap_or(now);

        let plain = serde_json::to_vec(&session.values)?;
        let values = self.values_key.encrypt(&plain, id.as_bytes())?;
        let record = SessionRecord {
            version: RECORD_VERSION,
            id: id.clone(),
            values,
            created_at,
            expires_at,
        };
        let raw = serde_json::to_vec(&record)?;
        let token = self.codec.encode(&session.name, &id, now, session.max_age)?;

        let mut tx = self.db.begin_write().await?;
        tx.create_bucket_if_not_exists(&self.bucket).await?;
        tx.put(&self.bucket, id.as_bytes(), &raw).await?;
        tx.commit().await?;

        let cookie = self.build_cookie(&session.name, token, session.max_age);
        self.append_cookie(response, cookie)?;

        session.id = Some(id);
        session.is_new = false;
        session.created_at = Some(created_at);
        session.expires_at = Some(expires_at);
        tracing::debug!(session = %session.name, %expires_at, "session saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SigningKey;
    use crate::db::HandleCache;
    use http::header::COOKIE;
    use tempfile::TempDir;

    struct Fixture {
        store: SessionStore,
        config: StoreConfig,
        _cache: HandleCache,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::in_dir(dir.path(), SigningKey::new(vec![7u8; 32]));
        let cache = HandleCache::new();
        let db = cache.acquire(&config.sessions_db_path).await.unwrap();
        let store = SessionStore::from_config(db, &config).unwrap();
        Fixture {
            store,
            config,
            _cache: cache,
            _dir: dir,
        }
    }

    /// Turn the response's Set-Cookie into a request Cookie header
    fn request_from(response: &HeaderMap) -> HeaderMap {
        let set_cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        let pair = set_cookie.split(';').next().unwrap().to_string();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, HeaderValue::from_str(&pair).unwrap());
        request
    }

    #[tokio::test]
    async fn test_rejects_short_signing_key() {
        let f = fixture().await;
        let mut config = f.config.clone();
        config.session_signing_key = SigningKey::new(b"short".to_vec());
        let result = SessionStore::from_config(f.store.db.clone(), &config);
        assert!(matches!(result, Err(SessionError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_cookie_attributes() {
        let f = fixture().await;
        let mut session = f.store.new(&HeaderMap::new(), "aurora").await;
        let mut response = HeaderMap::new();
        f.store
            .save(&HeaderMap::new(), &mut response, &mut session)
            .await
            .unwrap();

        let set_cookie = response.get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.starts_with("aurora="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains(&format!("Max-Age={}", f.config.session_max_age)));
        assert!(!set_cookie.contains(session.id().unwrap()));
    }

    #[tokio::test]
    async fn test_resave_keeps_id_and_created_at() {
        let f = fixture().await;
        let mut session = f.store.new(&HeaderMap::new(), "aurora").await;
        session.insert("uid", 1i64);
        let mut response = HeaderMap::new();
        f.store
            .save(&HeaderMap::new(), &mut response, &mut session)
            .await
            .unwrap();
        let id = session.id().unwrap().to_string();
        let created_at = session.created_at();

        let mut loaded = f.store.get(&request_from(&response), "aurora").await;
        loaded.insert("uid", 2i64);
        let mut second = HeaderMap::new();
        f.store
            .save(&HeaderMap::new(), &mut second, &mut loaded)
            .await
            .unwrap();
        assert_eq!(loaded.id(), Some(id.as_str()));
        assert_eq!(loaded.created_at(), created_at);
        assert_eq!(f.store.db.count(f.store.bucket()).await.unwrap(), 1);

        let again = f.store.get(&request_from(&second), "aurora").await;
        assert_eq!(again.get("uid").and_then(SessionValue::as_i64), Some(2));
    }

    #[tokio::test]
    async fn test_sweep_skips_live_and_removes_garbage() {
        let f = fixture().await;
        let mut session = f.store.new(&HeaderMap::new(), "aurora").await;
        f.store
            .save(&HeaderMap::new(), &mut HeaderMap::new(), &mut session)
            .await
            .unwrap();
        f.store
            .db
            .put(f.store.bucket(), b"garbage", b"not a record")
            .await
            .unwrap();

        let removed = f.store.sweep_expired(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(f
            .store
            .db
            .get(f.store.bucket(), session.id().unwrap().as_bytes())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_sweep_on_missing_bucket_is_noop() {
        let f = fixture().await;
        assert_eq!(f.store.sweep_expired(Utc::now()).await.unwrap(), 0);
    }
}
