//! Source platform seams: paginated history for pull mode and the two-step
//! file retrieval used by push mode.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    Result,
    types::{Message, MessageId},
};

/// Paginated access to one channel's history.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Up to `limit` messages whose identifier exceeds `min_id`.
    /// Ordering of the returned page is not guaranteed.
    async fn fetch_after(&self, min_id: MessageId, limit: usize) -> Result<Vec<Message>>;

    /// Up to `limit` messages older than `offset_id`, newest first.
    /// An `offset_id` of zero starts from the newest message.
    async fn fetch_before(&self, offset_id: MessageId, limit: usize) -> Result<Vec<Message>>;

    /// Materialise the message's media into `dest_dir`, returning the file path.
    async fn download(&self, message: &Message, dest_dir: &Path) -> Result<PathBuf>;
}

/// A retrieval token resolved into a downloadable location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    /// Platform-relative path the bytes are served from.
    pub file_path: String,
}

impl ResolvedFile {
    /// Last path segment, or `fallback` when the path has none.
    pub fn file_name(&self, fallback: &str) -> String {
        self.file_path
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }
}

/// Two-step media retrieval: resolve a file reference, then fetch its bytes.
#[async_trait]
pub trait FileResolver: Send + Sync {
    async fn resolve(&self, file_ref: &str) -> Result<ResolvedFile>;

    async fn fetch(&self, file: &ResolvedFile) -> Result<Vec<u8>>;
}
