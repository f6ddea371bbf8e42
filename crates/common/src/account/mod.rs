//! User accounts and profiles stored in the accounts database
//!
//! Accounts live in one bucket keyed by the normalized (trimmed,
//! lower-cased) email address, so an email can be registered once. Only
//! bcrypt hashes are ever stored; [`create_account`] refuses anything that
//! does not look like one.
//!
//! The repository functions are generic over [`Account`], with [`User`] as
//! the record the application registers.

mod password;
mod profile;
mod user;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::{Db, DbError};

pub use password::{hash_password, hash_password_with_cost, verify_password, DEFAULT_COST};
pub use profile::{get_profile, put_profile, Photo, Profile};
pub use user::{Registration, User};

/// Schema version written into every account and profile document
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("stored account record could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("an account with this email already exists")]
    Duplicate,

    #[error("account not found")]
    NotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("password hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("password task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// What the repository needs to know about a stored account
pub trait Account {
    fn email(&self) -> &str;

    /// bcrypt hash of the account's password
    fn password_hash(&self) -> &str;

    /// Record a modification time; called by [`update_account`]
    fn touch(&mut self, _at: DateTime<Utc>) {}
}

/// Lookup key for an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn check_bucket(bucket: &str) -> Result<(), AccountError> {
    if bucket.trim().is_empty() {
        return Err(AccountError::Configuration(
            "accounts bucket name is empty".to_string(),
        ));
    }
    Ok(())
}

fn account_key(email: &str) -> Result<String, AccountError> {
    let key = normalize_email(email);
    if key.is_empty() {
        return Err(AccountError::InvalidAccount("email is empty".to_string()));
    }
    Ok(key)
}

/// Store a new account
///
/// Runs as one write transaction: the bucket is created if needed, the email
/// is checked for an existing record, and the record is written.
///
/// # Errors
///
/// - [`AccountError::Duplicate`] if the email is already registered
/// - [`AccountError::InvalidAccount`] for an empty email or a password that
///   is not a bcrypt hash
/// - [`AccountError::Configuration`] for an empty bucket name
pub async fn create_account<A>(db: &Db, bucket: &str, account: &A) -> Result<(), AccountError>
where
    A: Account + Serialize,
{
    check_bucket(bucket)?;
    let key = account_key(account.email())?;
    if !password::is_bcrypt_hash(account.password_hash()) {
        return Err(AccountError::InvalidAccount(
            "password must be stored as a bcrypt hash".to_string(),
        ));
    }
    let value = serde_json::to_vec(account)?;

    let mut tx = db.begin_write().await?;
    tx.create_bucket_if_not_exists(bucket).await?;
    if tx.get(bucket, key.as_bytes()).await?.is_some() {
        tracing::debug!(bucket, "account already exists");
        return Err(AccountError::Duplicate);
    }
    tx.put(bucket, key.as_bytes(), &value).await?;
    tx.commit().await?;

    tracing::info!(bucket, "account created");
    Ok(())
}

/// Look up an account by email (case and surrounding whitespace ignored)
pub async fn get_account<A>(db: &Db, bucket: &str, email: &str) -> Result<A, AccountError>
where
    A: Account + DeserializeOwned,
{
    check_bucket(bucket)?;
    let key = account_key(email)?;
    let raw = db
        .get(bucket, key.as_bytes())
        .await?
        .ok_or(AccountError::NotFound)?;
    Ok(serde_json::from_slice(&raw)?)
}

pub async fn account_exists(db: &Db, bucket: &str, email: &str) -> Result<bool, AccountError> {
    check_bucket(bucket)?;
    let key = account_key(email)?;
    Ok(db.get(bucket, key.as_bytes()).await?.is_some())
}

/// Overwrite an existing account, refreshing its modification time
///
/// The record is located by the account's current email; changing the
/// email of a stored account is not supported and yields
/// [`AccountError::NotFound`].
pub async fn update_account<A>(db: &Db, bucket: &str, account: &mut A) -> Result<(), AccountError>
where
    A: Account + Serialize,
{
    check_bucket(bucket)?;
    let key = account_key(account.email())?;
    if !password::is_bcrypt_hash(account.password_hash()) {
        return Err(AccountError::InvalidAccount(
            "password must be stored as a bcrypt hash".to_string(),
        ));
    }

    let mut tx = db.begin_write().await?;
    if tx.get(bucket, key.as_bytes()).await?.is_none() {
        return Err(AccountError::NotFound);
    }
    account.touch(Utc::now());
    let value = serde_json::to_vec(account)?;
    tx.put(bucket, key.as_bytes(), &value).await?;
    tx.commit().await?;

    tracing::debug!(bucket, "account updated");
    Ok(())
}

/// Fetch an account and check its password
///
/// An unknown email and a wrong password both fail with
/// [`AccountError::InvalidCredentials`]. The bcrypt check runs on the
/// blocking pool.
pub async fn authenticate<A>(
    db: &Db,
    bucket: &str,
    email: &str,
    password: &str,
) -> Result<A, AccountError>
where
    A: Account + DeserializeOwned,
{
    let account: A = match get_account(db, bucket, email).await {
        Ok(account) => account,
        Err(AccountError::NotFound) => return Err(AccountError::InvalidCredentials),
        Err(e) => return Err(e),
    };

    let stored = account.password_hash().to_string();
    let candidate = password.to_string();
    tokio::task::spawn_blocking(move || verify_password(&stored, &candidate)).await??;
    Ok(account)
}
