//! Shared test utilities for store integration tests
#![allow(dead_code)]

use common::account::{hash_password_with_cost, User};
use common::config::{SigningKey, StoreConfig};
use common::db::{Db, HandleCache};
use common::session::SessionStore;
use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue};
use tempfile::TempDir;

/// Cheapest bcrypt cost, to keep tests fast
pub const TEST_COST: u32 = 4;

pub struct TestEnv {
    pub config: StoreConfig,
    pub cache: HandleCache,
    pub dir: TempDir,
}

/// A config pointing both databases into a fresh temp dir
pub fn setup_test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::in_dir(dir.path(), SigningKey::new(vec![0x5a; 32]));
    TestEnv {
        config,
        cache: HandleCache::new(),
        dir,
    }
}

impl TestEnv {
    pub async fn accounts_db(&self) -> Db {
        self.cache.acquire(&self.config.accounts_db_path).await.unwrap()
    }

    pub async fn session_store(&self) -> SessionStore {
        let db = self.cache.acquire(&self.config.sessions_db_path).await.unwrap();
        SessionStore::from_config(db, &self.config).unwrap()
    }
}

pub fn test_user(email: &str, password: &str) -> User {
    let hash = hash_password_with_cost(password, TEST_COST).unwrap();
    User::new("Mario", "Rossi", email, hash)
}

/// Build the next request's headers from a response's Set-Cookie, the way a
/// browser would
pub fn follow_cookie(response: &HeaderMap) -> HeaderMap {
    let mut request = HeaderMap::new();
    for set_cookie in response.get_all(SET_COOKIE) {
        let pair = set_cookie
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string();
        request.append(COOKIE, HeaderValue::from_str(&pair).unwrap());
    }
    request
}

/// A request carrying a single raw cookie
pub fn request_with_cookie(name: &str, value: &str) -> HeaderMap {
    let mut request = HeaderMap::new();
    request.insert(
        COOKIE,
        HeaderValue::from_str(&format!("{}={}", name, value)).unwrap(),
    );
    request
}

/// Value of the named cookie in a response's Set-Cookie headers
pub fn cookie_value(response: &HeaderMap, name: &str) -> Option<String> {
    response.get_all(SET_COOKIE).iter().find_map(|h| {
        let pair = h.to_str().ok()?.split(';').next()?;
        let (n, v) = pair.split_once('=')?;
        (n.trim() == name).then(|| v.trim().to_string())
    })
}
