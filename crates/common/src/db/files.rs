//! On-disk housekeeping for database files under a directory

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::{DbError, HandleCache};

/// SQLite sidecar files that belong to a database in WAL mode
const SIDECAR_SUFFIXES: [&str; 2] = ["-wal", "-shm"];

fn matches_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    !wanted.is_empty() && path.extension().is_some_and(|ext| ext == wanted)
}

/// All database files below `dir` (recursively) whose extension is
/// `extension`, sorted. The extension may be given with or without its dot.
pub fn database_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, DbError> {
    if extension.trim_start_matches('.').is_empty() {
        return Err(DbError::Configuration(
            "database file extension is empty".to_string(),
        ));
    }
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| DbError::Io(e.into()))?;
        if entry.file_type().is_file() && matches_extension(entry.path(), extension) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Delete every database file below `dir` with the given extension,
/// including its WAL sidecars
///
/// Files whose handle is still open in `cache` are left alone; close them
/// first with [`HandleCache::close_all`]. Returns the removed paths.
pub fn remove_database_files(
    cache: &HandleCache,
    dir: &Path,
    extension: &str,
) -> Result<Vec<PathBuf>, DbError> {
    let open = cache.open_paths();
    let mut removed = Vec::new();

    for path in database_files(dir, extension)? {
        let in_use = open
            .iter()
            .any(|p| p == &path || same_file(p, &path));
        if in_use {
            tracing::warn!(path = %path.display(), "skipping database file with an open handle");
            continue;
        }

        std::fs::remove_file(&path)?;
        for suffix in SIDECAR_SUFFIXES {
            let mut sidecar = path.clone().into_os_string();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
            }
        }
        tracing::debug!(path = %path.display(), "removed database file");
        removed.push(path);
    }

    Ok(removed)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
