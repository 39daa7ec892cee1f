//! Durable single-value relay cursor.
//!
//! The record is a text-encoded non-negative integer: the highest message
//! identifier whose relay unit was dispatched or intentionally skipped.
//! Writes go to a temp file that is fsynced and renamed over the record while
//! an exclusive lock is held, so a crash mid-write leaves the old value.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use {
    albumrelay_common::types::MessageId,
    fd_lock::RwLock,
    tracing::{debug, warn},
};

use crate::error::{Context, Result};

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("tmp")
    }

    /// Read the saved cursor. Absent, unreadable, or non-numeric records read as 0.
    pub fn load(&self) -> MessageId {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "checkpoint unreadable, starting from 0");
                return 0;
            },
        };
        match raw.trim().parse::<MessageId>() {
            Ok(id) if id >= 0 => id,
            _ => {
                warn!(path = %self.path.display(), "checkpoint is not a non-negative integer, starting from 0");
                0
            },
        }
    }

    /// Atomically replace the saved cursor with `id`.
    ///
    /// Does not enforce monotonic advance; callers only ever move forward.
    pub fn save(&self, id: MessageId) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create checkpoint dir {}", parent.display()))?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock.write().context("checkpoint lock failed")?;

        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{id}")?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        sync_parent(&self.path);

        debug!(checkpoint = id, "checkpoint saved");
        Ok(())
    }
}

fn sync_parent(path: &Path) {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return;
    };
    // Directory fsync is best-effort; not every platform allows opening a directory.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
}
