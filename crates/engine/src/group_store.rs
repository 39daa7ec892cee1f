//! Durable album buffer for push mode.
//!
//! Each invocation handles one event and keeps nothing in memory, so open
//! albums live on disk, one directory per group:
//!
//! ```text
//! <root>/<sanitized group id>/lock
//! <root>/<sanitized group id>/meta.json
//! <root>/<sanitized group id>/<message id>_<hex>_<file name>
//! ```
//!
//! Appends take the group's lock with a bounded blocking wait. The sweep only
//! tries each lock and skips groups another invocation is holding; the holder
//! is refreshing `updated_at`, so the group is not stale anyway.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use {
    albumrelay_common::{
        sink::{RelaySink, UnitFile},
        types::{GroupId, MessageId},
    },
    fd_lock::RwLock,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
};

use crate::{
    buffer::PendingUnit,
    dispatch::{DispatchOutcome, dispatch_unit},
    error::{Error, Result},
    scratch::remove_dir_quietly,
    throttle::{Acquire, SharedThrottle},
};

const LOCK_FILE: &str = "lock";
const META_FILE: &str = "meta.json";
const LOCK_POLL: Duration = Duration::from_millis(25);

/// Persisted state of one open group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default)]
    pub group_id: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub items: Vec<GroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub name: String,
    pub msg_id: MessageId,
}

/// A downloaded image to add to a group record.
#[derive(Debug, Clone)]
pub struct IncomingItem {
    pub group_id: GroupId,
    pub message_id: MessageId,
    pub file_name: String,
    pub caption: String,
    pub bytes: Vec<u8>,
}

/// What one sweep did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub flushed: usize,
    pub failed: usize,
    pub emptied: usize,
    pub corrupt: usize,
    pub busy: usize,
    pub still_open: usize,
}

pub struct GroupStore {
    root: PathBuf,
    lock_wait: Duration,
}

impl GroupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_wait: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, group_id: &GroupId) -> PathBuf {
        self.root.join(group_id.sanitized())
    }

    /// Append one item to its group's record under the group lock.
    ///
    /// The first non-empty caption sticks; `updated_at` is bumped to `now`.
    /// Returns the path the bytes were stored at.
    pub async fn append(&self, item: IncomingItem, now: i64) -> Result<PathBuf> {
        let dir = self.group_dir(&item.group_id);
        let lock_wait = self.lock_wait;
        tokio::task::spawn_blocking(move || append_blocking(&dir, item, now, lock_wait)).await?
    }

    /// Load a group's record without locking. Test and diagnostics helper.
    pub fn read_record(&self, group_id: &GroupId) -> Result<Option<GroupRecord>> {
        let meta = self.group_dir(group_id).join(META_FILE);
        match fs::read_to_string(&meta) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Flush every group idle for at least `idle`, as of `now`.
    ///
    /// A stale group's surviving members are sent as one unit and the group
    /// directory is deleted whatever the send outcome, so stale state never
    /// accumulates. Groups locked by another invocation are skipped.
    pub async fn sweep(
        &self,
        sink: &dyn RelaySink,
        throttle: &SharedThrottle,
        idle: Duration,
        now: i64,
    ) -> SweepReport {
        let mut report = SweepReport::default();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "cannot list group records");
                return report;
            },
        };
        let idle_secs = i64::try_from(idle.as_secs()).unwrap_or(i64::MAX);

        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Ok(lock_file) = open_lock(&dir) else {
                continue;
            };
            let mut lock = RwLock::new(lock_file);
            let guard = match lock.try_write() {
                Ok(guard) => guard,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    report.busy += 1;
                    continue;
                },
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "group lock failed");
                    continue;
                },
            };
            // Flushed by a concurrent sweep since we listed it.
            if !lock_is_current(&guard, &dir) {
                continue;
            }

            let record = match read_meta(&dir) {
                Some(record) if record.updated_at != 0 => record,
                _ => {
                    warn!(dir = %dir.display(), "removing group record without usable metadata");
                    remove_dir_quietly(&dir);
                    report.corrupt += 1;
                    continue;
                },
            };
            if now - record.updated_at < idle_secs {
                report.still_open += 1;
                continue;
            }

            let group_id = GroupId::new(record.group_id.clone());
            let members: Vec<UnitFile> = record
                .items
                .into_iter()
                .filter(|m| m.path.is_file())
                .map(|m| UnitFile {
                    path: m.path,
                    file_name: m.name,
                    message_id: m.msg_id,
                })
                .collect();

            if members.is_empty() {
                report.emptied += 1;
            } else {
                if throttle.lock().await.acquire().await == Acquire::Cancelled {
                    info!(group_id = %group_id, "sweep interrupted, group left for the next sweep");
                    break;
                }
                let unit = PendingUnit::assemble(Some(group_id), record.caption, members);
                match dispatch_unit(sink, unit).await {
                    DispatchOutcome::Sent { .. } => report.flushed += 1,
                    DispatchOutcome::Failed => report.failed += 1,
                }
            }
            remove_dir_quietly(&dir);
        }

        if report != SweepReport::default() {
            debug!(?report, "group sweep finished");
        }
        report
    }
}

fn open_lock(dir: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(dir.join(LOCK_FILE))
}

fn read_meta(dir: &Path) -> Option<GroupRecord> {
    let raw = fs::read_to_string(dir.join(META_FILE)).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_meta(dir: &Path, record: &GroupRecord) -> Result<()> {
    let tmp = dir.join(format!("{META_FILE}.tmp"));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(&serde_json::to_vec(record)?)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, dir.join(META_FILE))?;
    Ok(())
}

/// The lock we hold must still be the one at `<dir>/lock`: a sweep may have
/// deleted the directory while we were waiting.
fn lock_is_current(held: &File, dir: &Path) -> bool {
    let Ok(on_disk) = fs::metadata(dir.join(LOCK_FILE)) else {
        return false;
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        held.metadata().is_ok_and(|m| m.ino() == on_disk.ino() && m.dev() == on_disk.dev())
    }
    #[cfg(not(unix))]
    {
        let _ = (held, on_disk);
        true
    }
}

fn append_blocking(dir: &Path, item: IncomingItem, now: i64, lock_wait: Duration) -> Result<PathBuf> {
    let deadline = std::time::Instant::now() + lock_wait;

    loop {
        fs::create_dir_all(dir)?;
        let lock_file = match open_lock(dir) {
            Ok(file) => file,
            // Swept between creating the directory and opening the lock.
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let mut lock = RwLock::new(lock_file);
        let guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if std::time::Instant::now() >= deadline {
                    return Err(Error::LockTimeout {
                        group: item.group_id.to_string(),
                    });
                }
                std::thread::sleep(LOCK_POLL);
                continue;
            },
            Err(e) => return Err(e.into()),
        };
        if !lock_is_current(&guard, dir) {
            debug!(group_id = %item.group_id, "group record swept while waiting, retrying");
            continue;
        }

        let mut record = read_meta(dir).unwrap_or_else(|| GroupRecord {
            group_id: item.group_id.to_string(),
            created_at: now,
            updated_at: now,
            caption: String::new(),
            items: Vec::new(),
        });
        if record.group_id.is_empty() {
            record.group_id = item.group_id.to_string();
        }
        record.updated_at = now;
        if record.caption.is_empty() && !item.caption.is_empty() {
            record.caption = item.caption.clone();
        }

        let path = dir.join(format!(
            "{}_{:08x}_{}",
            item.message_id,
            rand::random::<u32>(),
            item.file_name
        ));
        fs::write(&path, &item.bytes)?;
        record.items.push(GroupMember {
            path: path.clone(),
            name: item.file_name.clone(),
            msg_id: item.message_id,
        });
        write_meta(dir, &record)?;

        debug!(
            group_id = %item.group_id,
            message_id = item.message_id,
            members = record.items.len(),
            "buffered album member"
        );
        drop(guard);
        return Ok(path);
    }
}
