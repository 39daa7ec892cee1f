//! In-memory collaborators for engine tests.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    albumrelay_common::{
        Error as CommonError, Result as CommonResult,
        sink::{RelaySink, UnitFile},
        source::{FileResolver, MessageSource, ResolvedFile},
        types::{GroupId, MediaDescriptor, Message, MessageId},
    },
    async_trait::async_trait,
};

pub fn photo(id: MessageId, group: Option<&str>, caption: &str) -> Message {
    Message {
        id,
        date: 1_700_000_000 + id,
        caption: (!caption.is_empty()).then(|| caption.to_string()),
        media: Some(MediaDescriptor::Photo {
            file_ref: format!("photo-{id}"),
            file_size: None,
        }),
        group_id: group.map(GroupId::from),
    }
}

pub fn text(id: MessageId) -> Message {
    Message {
        id,
        date: 1_700_000_000 + id,
        caption: Some("text only".into()),
        media: None,
        group_id: None,
    }
}

/// Channel history held in memory. Pages come back newest-first to exercise
/// the walker's sorting.
#[derive(Default)]
pub struct FakeSource {
    messages: BTreeMap<MessageId, Message>,
    payloads: HashMap<MessageId, Vec<u8>>,
    failing_downloads: HashSet<MessageId>,
    failing_pages: AtomicUsize,
    pub pages_fetched: AtomicUsize,
}

impl FakeSource {
    pub fn new(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().map(|m| (m.id, m)).collect(),
            ..Default::default()
        }
    }

    pub fn with_payload(mut self, id: MessageId, bytes: &[u8]) -> Self {
        self.payloads.insert(id, bytes.to_vec());
        self
    }

    pub fn failing_download(mut self, id: MessageId) -> Self {
        self.failing_downloads.insert(id);
        self
    }

    pub fn failing_pages(self, count: usize) -> Self {
        self.failing_pages.store(count, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn fetch_after(&self, min_id: MessageId, limit: usize) -> CommonResult<Vec<Message>> {
        if self
            .failing_pages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(CommonError::message("history unavailable"));
        }
        self.pages_fetched.fetch_add(1, Ordering::SeqCst);
        let mut page: Vec<Message> = self
            .messages
            .range(min_id + 1..)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect();
        page.reverse();
        Ok(page)
    }

    async fn fetch_before(&self, offset_id: MessageId, limit: usize) -> CommonResult<Vec<Message>> {
        let upper = if offset_id == 0 {
            MessageId::MAX
        } else {
            offset_id
        };
        Ok(self
            .messages
            .range(..upper)
            .rev()
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn download(&self, message: &Message, dest_dir: &Path) -> CommonResult<PathBuf> {
        if self.failing_downloads.contains(&message.id) {
            return Err(CommonError::message(format!(
                "download of {} failed",
                message.id
            )));
        }
        let bytes = self
            .payloads
            .get(&message.id)
            .cloned()
            .unwrap_or_else(|| format!("image-{}", message.id).into_bytes());
        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(format!("{}.jpg", message.id));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUnit {
    pub ids: Vec<MessageId>,
    pub names: Vec<String>,
    pub caption: String,
    pub all_files_present: bool,
}

/// Sink that records every unit it is handed.
#[derive(Default)]
pub struct RecordingSink {
    units: Mutex<Vec<SentUnit>>,
    fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn units(&self) -> Vec<SentUnit> {
        self.units.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelaySink for RecordingSink {
    async fn send_unit(&self, files: &[UnitFile], caption: &str) -> CommonResult<()> {
        self.units.lock().unwrap().push(SentUnit {
            ids: files.iter().map(|f| f.message_id).collect(),
            names: files.iter().map(|f| f.file_name.clone()).collect(),
            caption: caption.to_string(),
            all_files_present: files.iter().all(|f| f.path.is_file()),
        });
        if self.fail {
            return Err(CommonError::message("webhook returned 500"));
        }
        Ok(())
    }
}

/// Resolver serving bytes keyed by file reference.
#[derive(Default)]
pub struct FakeResolver {
    files: HashMap<String, Vec<u8>>,
}

impl FakeResolver {
    pub fn with_file(mut self, file_ref: &str, bytes: &[u8]) -> Self {
        self.files.insert(file_ref.to_string(), bytes.to_vec());
        self
    }
}

#[async_trait]
impl FileResolver for FakeResolver {
    async fn resolve(&self, file_ref: &str) -> CommonResult<ResolvedFile> {
        if !self.files.contains_key(file_ref) {
            return Err(CommonError::message(format!("unknown file {file_ref}")));
        }
        Ok(ResolvedFile {
            file_path: format!("photos/{file_ref}.jpg"),
        })
    }

    async fn fetch(&self, file: &ResolvedFile) -> CommonResult<Vec<u8>> {
        let file_ref = file
            .file_path
            .trim_start_matches("photos/")
            .trim_end_matches(".jpg");
        self.files
            .get(file_ref)
            .cloned()
            .ok_or_else(|| CommonError::message("gone"))
    }
}
