//! Bucket-organized key/value storage
//!
//! Every logical database is one SQLite file (WAL mode). Inside it, records
//! live in named buckets and are ordered by the raw bytes of their keys.
//!
//! - **[`HandleCache`]**: one shared [`Db`] per path for the whole process
//! - **[`Db`]**: reads straight from the pool, writes through [`WriteTx`]
//! - **[`WriteTx`]**: a single transaction holding the file's write slot
//!
//! # Concurrency
//!
//! At most one [`WriteTx`] exists per file at a time; the write slot is a
//! per-handle async mutex taken before `BEGIN` and released after
//! `COMMIT`/`ROLLBACK`. Readers never take the slot and see a consistent
//! WAL snapshot, either before or after any concurrent commit.

mod cache;
mod files;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteExecutor, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{Row, Sqlite, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use cache::HandleCache;
pub use files::{database_files, remove_database_files};

/// How long a connection waits on a locked file before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
/// Readers share the pool; the writer additionally holds the write slot
const MAX_CONNECTIONS: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Missing or invalid path / bucket name. Not retryable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O or transaction failure. The transaction was rolled back and the
    /// whole operation may be retried.
    #[error("storage error during {op} on bucket '{bucket}': {source}")]
    Storage {
        op: &'static str,
        bucket: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("bucket '{0}' does not exist")]
    BucketNotFound(String),

    #[error("error occurred while attempting database migration: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to close {} database(s): {}", .0.len(), describe_failures(.0))]
    Close(Vec<(PathBuf, String)>),
}

impl DbError {
    /// Whether retrying the whole operation can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Storage { .. })
    }
}

fn describe_failures(failures: &[(PathBuf, String)]) -> String {
    failures
        .iter()
        .map(|(path, reason)| format!("{}: {}", path.display(), reason))
        .collect::<Vec<_>>()
        .join("; ")
}

fn storage(op: &'static str, bucket: &str) -> impl FnOnce(sqlx::Error) -> DbError {
    let bucket = bucket.to_string();
    move |source| DbError::Storage { op, bucket, source }
}

fn check_bucket_name(name: &str) -> Result<(), DbError> {
    if name.trim().is_empty() {
        return Err(DbError::Configuration("bucket name is empty".to_string()));
    }
    Ok(())
}

/// A shared handle to one database file
///
/// Cheap to clone; all clones share the same connection pool and write slot.
/// Obtain handles from a [`HandleCache`] rather than opening files directly.
#[derive(Clone, Debug)]
pub struct Db {
    inner: Arc<DbInner>,
}

#[derive(Debug)]
struct DbInner {
    path: PathBuf,
    pool: SqlitePool,
    write_slot: Arc<Mutex<()>>,
}

impl Db {
    /// Open (creating if needed) the database file at `path`
    pub(crate) async fn open(path: &Path) -> Result<Self, DbError> {
        if path.as_os_str().is_empty() {
            return Err(DbError::Configuration("database path is empty".to_string()));
        }

        // Ensure parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DbError::Configuration(format!(
                    "cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                DbError::Configuration(format!(
                    "cannot open database {}: {}",
                    path.display(),
                    e
                ))
            })?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!(path = %path.display(), "database opened");

        Ok(Self {
            inner: Arc::new(DbInner {
                path: path.to_path_buf(),
                pool,
                write_slot: Arc::new(Mutex::new(())),
            }),
        })
    }

    /// Path this handle was opened with
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Start a write transaction, waiting for the write slot if another
    /// writer holds it
    pub async fn begin_write(&self) -> Result<WriteTx, DbError> {
        let slot = self.inner.write_slot.clone().lock_owned().await;
        let mut tx = self
            .inner
            .pool
            .begin()
            .await
            .map_err(storage("begin", ""))?;
        // Take the RESERVED lock before any read; SQLite skips the busy
        // handler when a read transaction upgrades to a write.
        sqlx::query("UPDATE buckets SET created_at = created_at WHERE 0")
            .execute(&mut *tx)
            .await
            .map_err(storage("begin", ""))?;
        Ok(WriteTx { tx, _slot: slot })
    }

    /// Checkpoint the WAL into the main file and close every connection
    ///
    /// Waits for an in-flight writer to finish first.
    pub(crate) async fn close(&self) -> Result<(), DbError> {
        let _slot = self.inner.write_slot.clone().lock_owned().await;
        let checkpoint = sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.inner.pool)
            .await
            .map_err(storage("checkpoint", ""));
        self.inner.pool.close().await;
        tracing::info!(path = %self.inner.path.display(), "database closed");
        checkpoint.map(|_| ())
    }

    pub async fn create_bucket_if_not_exists(&self, name: &str) -> Result<(), DbError> {
        let mut tx = self.begin_write().await?;
        tx.create_bucket_if_not_exists(name).await?;
        tx.commit().await
    }

    /// Remove a bucket together with all of its records
    pub async fn delete_bucket(&self, name: &str) -> Result<(), DbError> {
        let mut tx = self.begin_write().await?;
        tx.delete_bucket(name).await?;
        tx.commit().await
    }

    pub async fn bucket_exists(&self, name: &str) -> Result<bool, DbError> {
        check_bucket_name(name)?;
        bucket_exists(&self.inner.pool, name)
            .await
            .map_err(storage("bucket_exists", name))
    }

    /// Names of all buckets, sorted
    pub async fn list_buckets(&self) -> Result<Vec<String>, DbError> {
        sqlx::query_scalar::<_, String>("SELECT name FROM buckets ORDER BY name")
            .fetch_all(&self.inner.pool)
            .await
            .map_err(storage("list_buckets", ""))
    }

    /// Upsert a record. The bucket must already exist.
    pub async fn put(&self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        let mut tx = self.begin_write().await?;
        tx.put(bucket, key, value).await?;
        tx.commit().await
    }

    /// Read a record; `None` when the key (or the bucket) is absent
    pub async fn get(&self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        check_bucket_name(bucket)?;
        fetch_value(&self.inner.pool, bucket, key)
            .await
            .map_err(storage("get", bucket))
    }

    /// Remove a record. Absent keys and buckets are not an error.
    pub async fn delete(&self, bucket: &str, key: &[u8]) -> Result<(), DbError> {
        let mut tx = self.begin_write().await?;
        tx.delete(bucket, key).await?;
        tx.commit().await
    }

    /// Number of records in a bucket
    pub async fn count(&self, bucket: &str) -> Result<u64, DbError> {
        check_bucket_name(bucket)?;
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM records WHERE bucket = ?")
            .bind(bucket)
            .fetch_one(&self.inner.pool)
            .await
            .map_err(storage("count", bucket))?;
        Ok(count.max(0) as u64)
    }

    /// Visit every record of a bucket in key order
    ///
    /// Iteration stops early when `visit` returns `false`. The scan runs over
    /// a single read snapshot and does not take the write slot.
    pub async fn for_each<F>(&self, bucket: &str, mut visit: F) -> Result<(), DbError>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        check_bucket_name(bucket)?;
        let mut rows =
            sqlx::query("SELECT key, value FROM records WHERE bucket = ? ORDER BY key ASC")
                .bind(bucket)
                .fetch(&self.inner.pool);

        while let Some(row) = rows.try_next().await.map_err(storage("for_each", bucket))? {
            let key: Vec<u8> = row.try_get("key").map_err(storage("for_each", bucket))?;
            let value: Vec<u8> = row.try_get("value").map_err(storage("for_each", bucket))?;
            if !visit(&key, &value) {
                break;
            }
        }
        Ok(())
    }
}

/// An open write transaction holding its database's write slot
///
/// Dropping it without calling [`WriteTx::commit`] rolls back every write
/// made through it and frees the slot.
pub struct WriteTx {
    // `tx` is declared first so the rollback is queued before the slot frees
    tx: Transaction<'static, Sqlite>,
    _slot: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for WriteTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTx").finish_non_exhaustive()
    }
}

impl WriteTx {
    pub async fn commit(self) -> Result<(), DbError> {
        let WriteTx { tx, _slot } = self;
        tx.commit().await.map_err(storage("commit", ""))
    }

    /// Explicitly discard every write made in this transaction
    pub async fn rollback(self) -> Result<(), DbError> {
        let WriteTx { tx, _slot } = self;
        tx.rollback().await.map_err(storage("rollback", ""))
    }

    pub async fn create_bucket_if_not_exists(&mut self, name: &str) -> Result<(), DbError> {
        check_bucket_name(name)?;
        sqlx::query(
            r#"
            INSERT INTO buckets (name, created_at)
            VALUES (?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(chrono::Utc::now().timestamp())
        .execute(&mut *self.tx)
        .await
        .map_err(storage("create_bucket", name))?;
        Ok(())
    }

    pub async fn delete_bucket(&mut self, name: &str) -> Result<(), DbError> {
        self.require_bucket(name, "delete_bucket").await?;
        sqlx::query("DELETE FROM records WHERE bucket = ?")
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete_bucket", name))?;
        sqlx::query("DELETE FROM buckets WHERE name = ?")
            .bind(name)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete_bucket", name))?;
        tracing::debug!(bucket = name, "bucket deleted");
        Ok(())
    }

    pub async fn bucket_exists(&mut self, name: &str) -> Result<bool, DbError> {
        check_bucket_name(name)?;
        bucket_exists(&mut *self.tx, name)
            .await
            .map_err(storage("bucket_exists", name))
    }

    pub async fn put(&mut self, bucket: &str, key: &[u8], value: &[u8]) -> Result<(), DbError> {
        self.require_bucket(bucket, "put").await?;
        sqlx::query(
            r#"
            INSERT INTO records (bucket, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(bucket, key) DO UPDATE SET
                value = excluded.value
            "#,
        )
        .bind(bucket)
        .bind(key)
        .bind(value)
        .execute(&mut *self.tx)
        .await
        .map_err(storage("put", bucket))?;
        Ok(())
    }

    /// Read a record, observing this transaction's uncommitted writes
    pub async fn get(&mut self, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        check_bucket_name(bucket)?;
        fetch_value(&mut *self.tx, bucket, key)
            .await
            .map_err(storage("get", bucket))
    }

    pub async fn delete(&mut self, bucket: &str, key: &[u8]) -> Result<(), DbError> {
        check_bucket_name(bucket)?;
        sqlx::query("DELETE FROM records WHERE bucket = ? AND key = ?")
            .bind(bucket)
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(storage("delete", bucket))?;
        Ok(())
    }

    async fn require_bucket(&mut self, bucket: &str, op: &'static str) -> Result<(), DbError> {
        check_bucket_name(bucket)?;
        let exists = bucket_exists(&mut *self.tx, bucket)
            .await
            .map_err(storage(op, bucket))?;
        if !exists {
            return Err(DbError::BucketNotFound(bucket.to_string()));
        }
        Ok(())
    }
}

async fn bucket_exists<'e, E>(exec: E, name: &str) -> Result<bool, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM buckets WHERE name = ?")
        .bind(name)
        .fetch_optional(exec)
        .await?;
    Ok(found.is_some())
}

async fn fetch_value<'e, E>(exec: E, bucket: &str, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM records WHERE bucket = ? AND key = ?")
        .bind(bucket)
        .bind(key)
        .fetch_optional(exec)
        .await
}
