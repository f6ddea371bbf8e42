//! Symmetric encryption using ChaCha20-Poly1305
//!
//! Session payloads and cookie tokens are sealed with a `Secret`. Each sealed
//! value carries its own random nonce, and callers bind it to its context
//! (cookie name, session id) through associated data, so a ciphertext moved
//! to a different context fails authentication.

use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    ChaCha20Poly1305, Key, Nonce,
};

/// Size of ChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 12;
/// Size of ChaCha20-Poly1305 key in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;
/// Size of the Poly1305 authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Errors that can occur during encryption/decryption
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("invalid secret size, expected {expected}, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("failed to gather randomness: {0}")]
    Rng(getrandom::Error),
    #[error("encrypt error")]
    Encrypt,
    #[error("decrypt error")]
    Decrypt,
    #[error("data too short for nonce and tag")]
    Truncated,
}

/// Fill a fixed-size buffer from the operating system's CSPRNG.
pub fn random_bytes<const N: usize>() -> Result<[u8; N], SecretError> {
    let mut buff = [0u8; N];
    getrandom::getrandom(&mut buff).map_err(SecretError::Rng)?;
    Ok(buff)
}

/// A 256-bit symmetric key for ChaCha20-Poly1305
///
/// The sealed format is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Examples
///
/// ```
/// use common::crypto::Secret;
///
/// let secret = Secret::generate().unwrap();
/// let sealed = secret.encrypt(b"uid=123", b"session-id").unwrap();
/// let opened = secret.decrypt(&sealed, b"session-id").unwrap();
/// assert_eq!(opened, b"uid=123");
/// assert!(secret.decrypt(&sealed, b"other-id").is_err());
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; SECRET_SIZE]);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl From<[u8; SECRET_SIZE]> for Secret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        Secret(bytes)
    }
}

impl Secret {
    /// Generate a new random secret
    pub fn generate() -> Result<Self, SecretError> {
        Ok(Self(random_bytes::<SECRET_SIZE>()?))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(SecretError::InvalidSize {
                expected: SECRET_SIZE,
                actual: data.len(),
            });
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Derive a purpose-bound secret from arbitrary key material
    ///
    /// Uses BLAKE3 in key derivation mode; distinct `context` strings yield
    /// independent keys from the same material.
    pub fn derive(context: &str, key_material: &[u8]) -> Self {
        Self(blake3::derive_key(context, key_material))
    }

    /// Get a reference to the secret key bytes
    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.bytes()))
    }

    /// Encrypt `data`, authenticating `aad` alongside it
    ///
    /// A random nonce is generated for each call.
    pub fn encrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        let nonce_bytes = random_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, Payload { msg: data, aad })
            .map_err(|_| SecretError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce.as_ref());
        out.extend_from_slice(ciphertext.as_ref());

        Ok(out)
    }

    /// Decrypt data produced by [`Secret::encrypt`] with the same `aad`
    ///
    /// # Errors
    ///
    /// Fails if the input is shorter than a nonce plus tag, or if
    /// authentication fails (tampered data, wrong key or wrong `aad`).
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>, SecretError> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(SecretError::Truncated);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_SIZE);
        self.cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| SecretError::Decrypt)
    }
}
