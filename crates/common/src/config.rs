//! Store configuration supplied by the hosting application
//!
//! Nothing here is global: the host builds a [`StoreConfig`] (usually from a
//! TOML file) and hands the relevant pieces to the handle cache, the account
//! repository and the session store. Bucket names are checked again lazily
//! at first use, so a bad value fails the operation that needs it even if
//! [`StoreConfig::validate`] was never called.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Minimum length of the session signing key in bytes
pub const MIN_SIGNING_KEY_LEN: usize = 32;

const HEX_PREFIX: &str = "hex:";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Opaque secret bytes used to derive the session encryption keys
///
/// In configuration files it is written either as a plain string (its UTF-8
/// bytes are the key) or as `hex:<hex digits>`.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hex: &str) -> Result<Self, ConfigError> {
        hex::decode(hex)
            .map(Self)
            .map_err(|e| invalid("session_signing_key", format!("bad hex: {}", e)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigningKey({} bytes)", self.0.len())
    }
}

impl Serialize for SigningKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{}{}", HEX_PREFIX, hex::encode(&self.0)))
    }
}

impl<'de> Deserialize<'de> for SigningKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.strip_prefix(HEX_PREFIX) {
            Some(hex) => SigningKey::from_hex(hex).map_err(serde::de::Error::custom),
            None => Ok(SigningKey(raw.into_bytes())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

/// Attributes of the session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    #[serde(default = "default_cookie_path")]
    pub path: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default)]
    pub same_site: SameSite,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: default_cookie_path(),
            domain: None,
            secure: false,
            http_only: true,
            same_site: SameSite::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_accounts_db_path")]
    pub accounts_db_path: PathBuf,
    #[serde(default = "default_accounts_bucket")]
    pub accounts_bucket: String,
    #[serde(default = "default_profiles_bucket")]
    pub profiles_bucket: String,
    #[serde(default = "default_sessions_db_path")]
    pub sessions_db_path: PathBuf,
    #[serde(default = "default_sessions_bucket")]
    pub sessions_bucket: String,
    /// Directory holding the database files; only used by housekeeping
    #[serde(default = "default_db_dir")]
    pub db_dir: PathBuf,
    /// Extension of database files under `db_dir`, e.g. `.bdb`
    #[serde(default = "default_db_file_extension")]
    pub db_file_extension: String,

    #[serde(default = "default_session_name")]
    pub session_name: String,
    /// Session lifetime in seconds
    #[serde(default = "default_session_max_age")]
    pub session_max_age: i64,
    pub session_signing_key: SigningKey,
    #[serde(default)]
    pub session_cookie: CookieOptions,

    /// Seconds between expired-session sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Most records deleted per sweep transaction
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_accounts_db_path() -> PathBuf {
    PathBuf::from("db/accounts.bdb")
}

fn default_accounts_bucket() -> String {
    "accounts".to_string()
}

fn default_profiles_bucket() -> String {
    "profiles".to_string()
}

fn default_sessions_db_path() -> PathBuf {
    PathBuf::from("db/sessions.bdb")
}

fn default_sessions_bucket() -> String {
    "sessions".to_string()
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("db")
}

fn default_db_file_extension() -> String {
    ".bdb".to_string()
}

fn default_session_name() -> String {
    "aurora".to_string()
}

fn default_session_max_age() -> i64 {
    30 * 24 * 60 * 60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_sweep_batch_size() -> usize {
    128
}

impl StoreConfig {
    /// Defaults everywhere except the signing key
    pub fn new(session_signing_key: SigningKey) -> Self {
        Self {
            accounts_db_path: default_accounts_db_path(),
            accounts_bucket: default_accounts_bucket(),
            profiles_bucket: default_profiles_bucket(),
            sessions_db_path: default_sessions_db_path(),
            sessions_bucket: default_sessions_bucket(),
            db_dir: default_db_dir(),
            db_file_extension: default_db_file_extension(),
            session_name: default_session_name(),
            session_max_age: default_session_max_age(),
            session_signing_key,
            session_cookie: CookieOptions::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_batch_size: default_sweep_batch_size(),
        }
    }

    /// Same as [`StoreConfig::new`] but with both database files in `dir`
    pub fn in_dir(dir: impl Into<PathBuf>, session_signing_key: SigningKey) -> Self {
        let dir = dir.into();
        let mut config = Self::new(session_signing_key);
        config.accounts_db_path = dir.join("accounts.bdb");
        config.sessions_db_path = dir.join("sessions.bdb");
        config.db_dir = dir;
        config
    }

    /// Read a TOML configuration file. Does not call [`StoreConfig::validate`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path.as_ref())?;
        let config: StoreConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Check every field up front
    ///
    /// Optional: the components re-check what they need when used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts_db_path.as_os_str().is_empty() {
            return Err(invalid("accounts_db_path", "must not be empty"));
        }
        if self.sessions_db_path.as_os_str().is_empty() {
            return Err(invalid("sessions_db_path", "must not be empty"));
        }
        for (field, bucket) in [
            ("accounts_bucket", &self.accounts_bucket),
            ("profiles_bucket", &self.profiles_bucket),
            ("sessions_bucket", &self.sessions_bucket),
        ] {
            if bucket.trim().is_empty() {
                return Err(invalid(field, "bucket name must not be empty"));
            }
        }
        if self.db_file_extension.trim_start_matches('.').is_empty() {
            return Err(invalid("db_file_extension", "must not be empty"));
        }
        if self.session_name.trim().is_empty() {
            return Err(invalid("session_name", "must not be empty"));
        }
        if self.session_max_age <= 0 {
            return Err(invalid("session_max_age", "must be a positive number of seconds"));
        }
        if self.session_signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(invalid(
                "session_signing_key",
                format!(
                    "must be at least {} bytes, got {}",
                    MIN_SIGNING_KEY_LEN,
                    self.session_signing_key.len()
                ),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("sweep_interval_secs", "must be greater than zero"));
        }
        if self.sweep_batch_size == 0 {
            return Err(invalid("sweep_batch_size", "must be greater than zero"));
        }
        Ok(())
    }
}
