use super::AccountError;

/// bcrypt work factor used by [`hash_password`]
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Hash a plaintext password with a fresh salt at [`DEFAULT_COST`]
///
/// CPU-bound; call it from `spawn_blocking` inside async code.
pub fn hash_password(plain: &str) -> Result<String, AccountError> {
    hash_password_with_cost(plain, DEFAULT_COST)
}

pub fn hash_password_with_cost(plain: &str, cost: u32) -> Result<String, AccountError> {
    Ok(bcrypt::hash(plain, cost)?)
}

/// Check `candidate` against a stored bcrypt hash
///
/// A mismatch and a stored hash that cannot be parsed both come back as
/// [`AccountError::InvalidCredentials`].
pub fn verify_password(stored_hash: &str, candidate: &str) -> Result<(), AccountError> {
    match bcrypt::verify(candidate, stored_hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(AccountError::InvalidCredentials),
        Err(e) => {
            tracing::warn!(error = %e, "stored password hash could not be parsed");
            Err(AccountError::InvalidCredentials)
        }
    }
}

/// Whether `hash` has the shape of a bcrypt hash (`$2a$`, `$2b$`, ...)
pub(crate) fn is_bcrypt_hash(hash: &str) -> bool {
    hash.len() == 60 && hash.starts_with("$2") && hash.as_bytes().get(3) == Some(&b'$')
}
