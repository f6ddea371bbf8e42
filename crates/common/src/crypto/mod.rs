//! Cryptographic primitives for Aurora
//!
//! - **Encryption**: ChaCha20-Poly1305 [`Secret`]s with associated data, used
//!   for session cookie tokens and for session values at rest
//! - **Key derivation**: BLAKE3 `derive_key` turns the configured signing key
//!   into independent purpose-bound secrets
//! - **Passwords**: bcrypt lives with the accounts in
//!   [`crate::account`], since only the repository consumes it

mod secret;

pub use secret::{random_bytes, Secret, SecretError, NONCE_SIZE, SECRET_SIZE, TAG_SIZE};
