use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Db;

use super::{check_bucket, AccountError, RECORD_VERSION};

fn record_version() -> u32 {
    RECORD_VERSION
}

/// A reference to an uploaded photo; the image itself lives elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: Uuid,
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Optional personal details attached to a user, keyed by the user's uuid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "record_version")]
    pub version: u32,
    pub id: Uuid,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    /// Centimetres
    #[serde(default)]
    pub height: Option<u32>,
    /// Kilograms
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default)]
    pub hobbies: Vec<String>,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub street: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// An empty profile for the user with uuid `id`
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            version: RECORD_VERSION,
            id,
            age: None,
            birth_date: None,
            height: None,
            weight: None,
            hobbies: Vec::new(),
            city: String::new(),
            country: String::new(),
            street: String::new(),
            picture: None,
            photos: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn profile_key(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

/// Insert or replace the profile stored under `profile.id`
///
/// Creates the bucket on first use and refreshes `updated_at`.
pub async fn put_profile(db: &Db, bucket: &str, profile: &mut Profile) -> Result<(), AccountError> {
    check_bucket(bucket)?;
    profile.updated_at = Utc::now();
    let value = serde_json::to_vec(profile)?;

    let mut tx = db.begin_write().await?;
    tx.create_bucket_if_not_exists(bucket).await?;
    tx.put(bucket, profile_key(&profile.id).as_bytes(), &value)
        .await?;
    tx.commit().await?;

    tracing::debug!(bucket, profile = %profile.id, "profile stored");
    Ok(())
}

pub async fn get_profile(db: &Db, bucket: &str, id: &Uuid) -> Result<Profile, AccountError> {
    check_bucket(bucket)?;
    let raw = db
        .get(bucket, profile_key(id).as_bytes())
        .await?
        .ok_or(AccountError::NotFound)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::HandleCache;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_get_profile() {
        let dir = TempDir::new().unwrap();
        let cache = HandleCache::new();
        let db = cache.acquire(dir.path().join("accounts.bdb")).await.unwrap();

        let mut profile = Profile::new(Uuid::new_v4());
        profile.age = Some(36);
        profile.birth_date = NaiveDate::from_ymd_opt(1988, 2, 29);
        profile.hobbies = vec!["climbing".to_string()];
        profile.photos.push(Photo {
            id: Uuid::new_v4(),
            url: "/media/p1.jpg".to_string(),
            caption: None,
        });
        put_profile(&db, "profiles", &mut profile).await.unwrap();

        let loaded = get_profile(&db, "profiles", &profile.id).await.unwrap();
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cache = HandleCache::new();
        let db = cache.acquire(dir.path().join("accounts.bdb")).await.unwrap();

        let result = get_profile(&db, "profiles", &Uuid::new_v4()).await;
        assert!(matches!(result, Err(AccountError::NotFound)));
    }
}
