//! Integration tests for the handle cache and bucket storage

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::db::{database_files, remove_database_files, DbError, HandleCache};

#[tokio::test]
async fn test_concurrent_acquire_shares_one_handle() {
    let env = common::setup_test_env();
    let cache = Arc::new(HandleCache::new());
    let path = env.config.accounts_db_path.clone();

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let cache = cache.clone();
        let path = path.clone();
        tasks.push(tokio::spawn(async move { cache.acquire(&path).await.unwrap() }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(cache.len(), 1);
    assert_eq!(cache.open_paths(), vec![path]);
}

#[tokio::test]
async fn test_writes_visible_through_every_handle() {
    let env = common::setup_test_env();
    let a = env.accounts_db().await;
    let b = env.accounts_db().await;

    a.create_bucket_if_not_exists("accounts").await.unwrap();
    a.put("accounts", b"key", b"value").await.unwrap();
    assert_eq!(
        b.get("accounts", b"key").await.unwrap(),
        Some(b"value".to_vec())
    );
}

#[tokio::test]
async fn test_concurrent_writers_are_serialized() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    db.create_bucket_if_not_exists("counters").await.unwrap();
    db.put("counters", b"n", &0u64.to_be_bytes()).await.unwrap();

    // Read-modify-write inside one transaction; lost updates would show up
    // as a final count below the number of writers.
    let mut tasks = Vec::new();
    for _ in 0..20 {
        let db = db.clone();
        tasks.push(tokio::spawn(async move {
            let mut tx = db.begin_write().await.unwrap();
            let raw = tx.get("counters", b"n").await.unwrap().unwrap();
            let n = u64::from_be_bytes(raw.try_into().unwrap());
            tx.put("counters", b"n", &(n + 1).to_be_bytes())
                .await
                .unwrap();
            tx.commit().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let raw = db.get("counters", b"n").await.unwrap().unwrap();
    assert_eq!(u64::from_be_bytes(raw.try_into().unwrap()), 20);
}

#[tokio::test]
async fn test_cancelled_writer_releases_slot() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    db.create_bucket_if_not_exists("b").await.unwrap();

    let holder = db.clone();
    let stuck = tokio::spawn(async move {
        let mut tx = holder.begin_write().await.unwrap();
        tx.put("b", b"k", b"never committed").await.unwrap();
        tokio::time::sleep(Duration::from_secs(3600)).await;
        tx.commit().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    stuck.abort();
    let _ = stuck.await;

    tokio::time::timeout(Duration::from_secs(10), db.put("b", b"k", b"committed"))
        .await
        .expect("write slot was not released")
        .unwrap();
    assert_eq!(db.get("b", b"k").await.unwrap(), Some(b"committed".to_vec()));
}

#[tokio::test]
async fn test_for_each_visits_in_key_order_and_stops() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    db.create_bucket_if_not_exists("ordered").await.unwrap();
    db.create_bucket_if_not_exists("other").await.unwrap();
    for key in [&b"b"[..], b"a", b"\x00z", b"ab", b"\xff"] {
        db.put("ordered", key, b"v").await.unwrap();
    }
    db.put("other", b"aa", b"v").await.unwrap();

    let mut seen = Vec::new();
    db.for_each("ordered", |key, _| {
        seen.push(key.to_vec());
        true
    })
    .await
    .unwrap();
    assert_eq!(
        seen,
        vec![
            b"\x00z".to_vec(),
            b"a".to_vec(),
            b"ab".to_vec(),
            b"b".to_vec(),
            b"\xff".to_vec()
        ]
    );

    let mut first_two = Vec::new();
    db.for_each("ordered", |key, _| {
        first_two.push(key.to_vec());
        first_two.len() < 2
    })
    .await
    .unwrap();
    assert_eq!(first_two, vec![b"\x00z".to_vec(), b"a".to_vec()]);
}

#[tokio::test]
async fn test_reopen_after_close_all_sees_committed_data() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    db.create_bucket_if_not_exists("accounts").await.unwrap();
    db.put("accounts", b"k", b"durable").await.unwrap();

    env.cache.close_all().await.unwrap();
    assert!(env.cache.is_empty());
    assert!(db.get("accounts", b"k").await.is_err());

    let reopened = env.accounts_db().await;
    assert_eq!(
        reopened.get("accounts", b"k").await.unwrap(),
        Some(b"durable".to_vec())
    );
}

#[tokio::test]
async fn test_remove_database_files_after_close() {
    let env = common::setup_test_env();
    env.accounts_db().await;
    env.session_store().await;

    let files = database_files(&env.config.db_dir, &env.config.db_file_extension).unwrap();
    assert_eq!(files.len(), 2);

    let removed =
        remove_database_files(&env.cache, &env.config.db_dir, &env.config.db_file_extension)
            .unwrap();
    assert!(removed.is_empty());

    env.cache.close_all().await.unwrap();
    let removed =
        remove_database_files(&env.cache, &env.config.db_dir, &env.config.db_file_extension)
            .unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!env.config.accounts_db_path.exists());
}

#[tokio::test]
async fn test_missing_bucket_reads_as_absent() {
    let env = common::setup_test_env();
    let db = env.accounts_db().await;
    assert_eq!(db.get("nowhere", b"k").await.unwrap(), None);
    assert!(matches!(
        db.put("nowhere", b"k", b"v").await,
        Err(DbError::BucketNotFound(_))
    ));
}
