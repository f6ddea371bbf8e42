/**
 * User accounts and profiles.
 *  Stored as JSON documents in the accounts
 *  database, keyed by normalized email.
 */
pub mod account;
/**
 * Store configuration, passed in by the host.
 */
pub mod config;
/**
 * Cryptographic types and operations.
 *  - Symmetric AEAD secrets
 *  - Purpose-specific key derivation
 */
pub mod crypto;
/**
 * Embedded storage layer.
 *  One SQLite file per database, organized
 *  into buckets of ordered key/value records,
 *  plus the process-wide handle cache.
 */
pub mod db;
/**
 * Encrypted, cookie-addressed sessions
 *  and the background sweep of expired ones.
 */
pub mod session;

pub mod prelude {
    pub use crate::account::{Account, AccountError, Profile, User};
    pub use crate::config::{SigningKey, StoreConfig};
    pub use crate::db::{Db, DbError, HandleCache};
    pub use crate::session::{Session, SessionError, SessionManager, SessionStore, SessionValue};
}
