//! Local byte storage for downloaded media.

use std::{
    io,
    path::{Path, PathBuf},
};

use tracing::debug;

/// Delete a local media file, ignoring failures.
///
/// A leftover file only costs disk space, so errors are logged and dropped.
pub fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => debug!(path = %path.display(), error = %e, "failed to delete local media"),
    }
}

/// Delete a directory tree, ignoring failures.
pub fn remove_dir_quietly(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::NotFound => {},
        Err(e) => debug!(path = %path.display(), error = %e, "failed to delete directory"),
    }
}

/// Create `dir` if needed and delete any regular files left in it.
///
/// Returns how many stale files were removed.
pub fn prepare_dir(dir: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(dir)?;
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        if path.is_file() {
            remove_quietly(&path);
            removed += 1;
        }
    }
    Ok(removed)
}

/// A unique path under `dir` for a file originally named `file_name`.
pub fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    dir.join(format!("{}_{}", uuid::Uuid::new_v4().simple(), file_name))
}
