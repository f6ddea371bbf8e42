//! Integration tests for the account repository

mod common;

use ::common::account::{
    account_exists, create_account, get_account, get_profile, put_profile, verify_password,
    AccountError, Profile, User,
};

#[tokio::test]
async fn test_create_then_get_case_insensitive() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    let bucket = &env.config.accounts_bucket;

    let user = common::test_user("Mario.Rossi@Example.com", "mamamia");
    create_account(&db, bucket, &user).await.unwrap();

    let stored: User = get_account(&db, bucket, "  mario.rossi@example.COM ")
        .await
        .unwrap();
    assert_eq!(stored.uuid, user.uuid);
    assert_eq!(stored.email, "Mario.Rossi@Example.com");
    assert_ne!(stored.password_hash, "mamamia");
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    let bucket = &env.config.accounts_bucket;

    let first = common::test_user("mario@example.com", "mamamia");
    create_account(&db, bucket, &first).await.unwrap();

    let second = common::test_user("MARIO@example.com", "other");
    let result = create_account(&db, bucket, &second).await;
    assert!(matches!(result, Err(AccountError::Duplicate)));

    // The first record is untouched
    let stored: User = get_account(&db, bucket, "mario@example.com").await.unwrap();
    assert_eq!(stored.uuid, first.uuid);
    assert_eq!(db.count(bucket).await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_registrations_keep_one() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    let bucket = env.config.accounts_bucket.clone();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let db = db.clone();
        let bucket = bucket.clone();
        let user = common::test_user("race@example.com", "mamamia");
        tasks.push(tokio::spawn(async move {
            create_account(&db, &bucket, &user).await
        }));
    }

    let mut created = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => created += 1,
            Err(AccountError::Duplicate) => duplicates += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
}

#[tokio::test]
async fn test_verify_password() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    let bucket = &env.config.accounts_bucket;

    create_account(&db, bucket, &common::test_user("mario@example.com", "mamamia"))
        .await
        .unwrap();
    let stored: User = get_account(&db, bucket, "mario@example.com").await.unwrap();

    verify_password(&stored.password_hash, "mamamia").unwrap();
    assert!(matches!(
        verify_password(&stored.password_hash, "mamami0"),
        Err(AccountError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    let bucket = &env.config.accounts_bucket;

    let result = get_account::<User>(&db, bucket, "nobody@example.com").await;
    assert!(matches!(result, Err(AccountError::NotFound)));
    assert!(!account_exists(&db, bucket, "nobody@example.com").await.unwrap());
}

#[tokio::test]
async fn test_missing_bucket_config_fails_lazily() {
    let mut env = common::setup_test_env();
    env.config.accounts_bucket = String::new();
    let db = env.accounts_db().await;

    let user = common::test_user("mario@example.com", "mamamia");
    let result = create_account(&db, &env.config.accounts_bucket, &user).await;
    assert!(matches!(result, Err(AccountError::Configuration(_))));
    assert!(env.config.validate().is_err());
}

#[tokio::test]
async fn test_profile_lives_beside_accounts() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;

    let user = common::test_user("mario@example.com", "mamamia");
    create_account(&db, &env.config.accounts_bucket, &user)
        .await
        .unwrap();

    let mut profile = Profile::new(user.uuid);
    profile.city = "Napoli".to_string();
    profile.hobbies = vec!["pizza".to_string(), "opera".to_string()];
    put_profile(&db, &env.config.profiles_bucket, &mut profile)
        .await
        .unwrap();

    let loaded = get_profile(&db, &env.config.profiles_bucket, &user.uuid)
        .await
        .unwrap();
    assert_eq!(loaded.city, "Napoli");
    assert_eq!(loaded.hobbies.len(), 2);
    assert_eq!(
        db.list_buckets().await.unwrap(),
        vec!["accounts".to_string(), "profiles".to_string()]
    );
}
