use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{Db, DbError};

/// Process-wide registry of open database handles, keyed by path
///
/// Owned by the application's composition root and passed by reference to
/// whatever needs a database. Each path is opened at most once: concurrent
/// [`HandleCache::acquire`] calls for the same path share one open attempt,
/// and every caller receives a clone of the same [`Db`].
///
/// The map lock is only held to look up or insert the per-path cell, never
/// across the open itself, so opening one file does not stall acquires of
/// already-open files.
#[derive(Debug, Default)]
pub struct HandleCache {
    handles: Mutex<HashMap<PathBuf, Arc<OnceCell<Db>>>>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared handle for `path`, opening the file on first use
    ///
    /// # Errors
    ///
    /// [`DbError::Configuration`] when the path is empty or the file (or its
    /// parent directories) cannot be created or opened. A failed open is not
    /// cached; the next call tries again.
    pub async fn acquire(&self, path: impl AsRef<Path>) -> Result<Db, DbError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(DbError::Configuration("database path is empty".to_string()));
        }

        let cell = {
            let mut handles = self.handles.lock();
            handles.entry(path.to_path_buf()).or_default().clone()
        };

        let db = cell.get_or_try_init(|| Db::open(path)).await?;
        Ok(db.clone())
    }

    /// Whether an open handle exists for exactly this path
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.handles
            .lock()
            .get(path.as_ref())
            .is_some_and(|cell| cell.initialized())
    }

    /// Paths with an open handle
    pub fn open_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .handles
            .lock()
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(path, _)| path.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.handles
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every cached handle and empty the cache
    ///
    /// Every handle is attempted even if an earlier one fails; failures are
    /// reported together in [`DbError::Close`]. Clones of a closed [`Db`]
    /// still held elsewhere fail with storage errors from then on.
    pub async fn close_all(&self) -> Result<(), DbError> {
        let drained: Vec<(PathBuf, Arc<OnceCell<Db>>)> = self.handles.lock().drain().collect();

        let mut failures = Vec::new();
        for (path, cell) in drained {
            let Some(db) = cell.get() else {
                continue;
            };
            if let Err(e) = db.close().await {
                tracing::warn!(path = %path.display(), error = %e, "failed to close database");
                failures.push((path, e.to_string()));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DbError::Close(failures))
        }
    }
}
