use std::path::PathBuf;

use async_trait::async_trait;

use crate::{Result, types::MessageId};

/// Most files a single relay unit may carry.
pub const MAX_UNIT_FILES: usize = 10;

/// One materialised file inside a relay unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFile {
    pub path: PathBuf,
    pub file_name: String,
    pub message_id: MessageId,
}

/// Destination for finished relay units.
///
/// Implementations send the whole unit as one request and never retry.
/// Local cleanup of the files is the caller's job regardless of outcome.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn send_unit(&self, files: &[UnitFile], caption: &str) -> Result<()>;
}
