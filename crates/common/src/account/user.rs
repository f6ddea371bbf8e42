use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::password::hash_password_with_cost;
use super::{Account, AccountError, RECORD_VERSION};

fn record_version() -> u32 {
    RECORD_VERSION
}

/// A registered user as stored in the accounts bucket
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(default = "record_version")]
    pub version: u32,
    pub uuid: Uuid,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A new user with a fresh uuid. `password_hash` must already be hashed.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            version: RECORD_VERSION,
            uuid: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

impl Account for User {
    fn email(&self) -> &str {
        &self.email
    }

    fn password_hash(&self) -> &str {
        &self.password_hash
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("uuid", &self.uuid)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password_hash", &"<redacted>")
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish_non_exhaustive()
    }
}

/// Sign-up form data
///
/// Carries the plaintext password and its confirmation only until
/// [`Registration::into_user`] hashes it; never persisted.
#[derive(Clone, Deserialize)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl Registration {
    /// Check the confirmation and hash the password at `cost`
    ///
    /// CPU-bound because of bcrypt.
    pub fn into_user(self, cost: u32) -> Result<User, AccountError> {
        if self.password.is_empty() {
            return Err(AccountError::InvalidAccount(
                "password is empty".to_string(),
            ));
        }
        if self.password != self.confirm_password {
            return Err(AccountError::InvalidAccount(
                "passwords do not match".to_string(),
            ));
        }
        let hash = hash_password_with_cost(&self.password, cost)?;
        Ok(User::new(self.first_name, self.last_name, self.email, hash))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::verify_password;

    fn registration(password: &str, confirm: &str) -> Registration {
        Registration {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: "ada@example.com".to_string(),
            password: password.to_string(),
            confirm_password: confirm.to_string(),
        }
    }

    #[test]
    fn test_registration_hashes_password() {
        let user = registration("mamamia", "mamamia").into_user(4).unwrap();
        assert_ne!(user.password_hash, "mamamia");
        verify_password(&user.password_hash, "mamamia").unwrap();
        assert_eq!(user.full_name(), "Ada Lovelace");
    }

    #[test]
    fn test_registration_rejects_mismatch() {
        let err = registration("mamamia", "mamami0").into_user(4).unwrap_err();
        assert!(matches!(err, AccountError::InvalidAccount(_)));
    }

    #[test]
    fn test_serialized_user_has_no_plaintext() {
        let user = registration("mamamia", "mamamia").into_user(4).unwrap();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("mamamia"));
        assert!(!json.contains("confirm_password"));
        assert!(json.contains("\"version\":1"));
    }

    #[test]
    fn test_decode_ignores_unknown_and_defaults_missing() {
        let json = r#"{
            "uuid": "6f0c5a3e-9a43-4b43-9d1b-0f6b1f0b7a11",
            "email": "ada@example.com",
            "password_hash": "x",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "favourite_colour": "green"
        }"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.version, RECORD_VERSION);
        assert_eq!(user.first_name, "");
    }

    #[test]
    fn test_debug_redacts_hash() {
        let user = User::new("Ada", "Lovelace", "ada@example.com", "$2b$secret");
        assert!(!format!("{:?}", user).contains("secret"));
    }
}
