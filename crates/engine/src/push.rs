//! Push-mode handler: one inbound event per call, no state kept in memory.

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    albumrelay_common::{
        sink::RelaySink,
        source::FileResolver,
        types::{GroupId, Message, MessageId},
    },
    albumrelay_config::RelayConfig,
    tracing::{debug, info, warn},
};

use crate::{
    buffer::{PendingUnit, RelayItem},
    classify::{Classification, classify},
    dispatch::{DispatchOutcome, dispatch_unit},
    group_store::{GroupStore, IncomingItem, SweepReport},
    scratch::{remove_quietly, unique_path},
    throttle::{Acquire, SharedThrottle},
};

/// What happened to the event's message, before the sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// No message, or not an image.
    Ignored,
    DownloadFailed,
    /// Empty or larger than the sink accepts.
    Skipped { bytes: u64 },
    Sent,
    SendFailed,
    /// Termination was requested while waiting on the rate limit.
    Cancelled,
    Buffered { group_id: GroupId },
    BufferFailed { group_id: GroupId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushReport {
    pub disposition: Disposition,
    pub sweep: SweepReport,
}

pub struct PushRelay {
    resolver: Arc<dyn FileResolver>,
    sink: Arc<dyn RelaySink>,
    groups: GroupStore,
    inbox_dir: PathBuf,
    throttle: SharedThrottle,
    max_file_bytes: u64,
    idle: Duration,
}

impl PushRelay {
    pub fn new(
        config: &RelayConfig,
        resolver: Arc<dyn FileResolver>,
        sink: Arc<dyn RelaySink>,
        throttle: SharedThrottle,
    ) -> Self {
        Self {
            resolver,
            sink,
            groups: GroupStore::new(config.storage.groups_dir()),
            inbox_dir: config.storage.inbox_dir(),
            throttle,
            max_file_bytes: config.max_file_bytes(),
            idle: config.relay.group_idle(),
        }
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    /// Handle one event's message (if any), then sweep stale groups.
    pub async fn handle_message(&self, message: Option<&Message>) -> PushReport {
        self.handle_message_at(message, chrono::Utc::now().timestamp())
            .await
    }

    /// [`Self::handle_message`] with an explicit clock, in unix seconds.
    pub async fn handle_message_at(&self, message: Option<&Message>, now: i64) -> PushReport {
        let disposition = match message {
            Some(message) => self.route(message, now).await,
            None => Disposition::Ignored,
        };
        let sweep = self.sweep_at(now).await;
        PushReport { disposition, sweep }
    }

    /// Flush every group idle past the threshold without handling an event.
    pub async fn sweep_at(&self, now: i64) -> SweepReport {
        self.groups
            .sweep(self.sink.as_ref(), &self.throttle, self.idle, now)
            .await
    }

    async fn route(&self, message: &Message, now: i64) -> Disposition {
        let Some(media) = message.media.as_ref() else {
            return Disposition::Ignored;
        };
        if classify(message) == Classification::NotImage {
            debug!(message_id = message.id, "ignoring non-image message");
            return Disposition::Ignored;
        }

        let (bytes, file_name) = match self.retrieve(message.id, media.file_ref()).await {
            Ok((bytes, resolved_name)) => (bytes, media.file_name_or(|| resolved_name)),
            Err(e) => {
                warn!(message_id = message.id, error = %e, "media retrieval failed, message skipped");
                return Disposition::DownloadFailed;
            },
        };

        let size = bytes.len() as u64;
        if size == 0 || size > self.max_file_bytes {
            warn!(
                message_id = message.id,
                bytes = size,
                limit = self.max_file_bytes,
                "media empty or too large, message skipped"
            );
            return Disposition::Skipped { bytes: size };
        }

        let caption = message.caption_text().to_string();
        match message.group_id.clone() {
            Some(group_id) => {
                let item = IncomingItem {
                    group_id: group_id.clone(),
                    message_id: message.id,
                    file_name,
                    caption,
                    bytes,
                };
                match self.groups.append(item, now).await {
                    Ok(_) => Disposition::Buffered { group_id },
                    Err(e) => {
                        warn!(message_id = message.id, group_id = %group_id, error = %e, "failed to buffer album member");
                        Disposition::BufferFailed { group_id }
                    },
                }
            },
            None => self.send_standalone(message.id, file_name, caption, bytes).await,
        }
    }

    async fn retrieve(
        &self,
        message_id: MessageId,
        file_ref: &str,
    ) -> albumrelay_common::Result<(Vec<u8>, String)> {
        let resolved = self.resolver.resolve(file_ref).await?;
        debug!(message_id, file_path = %resolved.file_path, "resolved media");
        let bytes = self.resolver.fetch(&resolved).await?;
        Ok((bytes, resolved.file_name("image.jpg")))
    }

    async fn send_standalone(
        &self,
        message_id: MessageId,
        file_name: String,
        caption: String,
        bytes: Vec<u8>,
    ) -> Disposition {
        let path = unique_path(&self.inbox_dir, &file_name);
        let written = match tokio::fs::create_dir_all(&self.inbox_dir).await {
            Ok(()) => tokio::fs::write(&path, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(message_id, error = %e, "failed to stage media");
            remove_quietly(&path);
            return Disposition::DownloadFailed;
        }

        if self.throttle.lock().await.acquire().await == Acquire::Cancelled {
            info!(message_id, "termination requested, standalone image not relayed");
            remove_quietly(&path);
            return Disposition::Cancelled;
        }

        let unit = PendingUnit::singleton(RelayItem {
            message_id,
            path,
            file_name,
            caption,
            group_id: None,
        });
        match dispatch_unit(self.sink.as_ref(), unit).await {
            DispatchOutcome::Sent { .. } => Disposition::Sent,
            DispatchOutcome::Failed => Disposition::SendFailed,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            test_support::{FakeResolver, RecordingSink, photo, text},
            throttle::RelayThrottle,
        },
        albumrelay_common::types::MediaDescriptor,
        tempfile::TempDir,
        tokio_util::sync::CancellationToken,
    };

    struct Harness {
        _tmp: TempDir,
        sink: Arc<RecordingSink>,
        relay: PushRelay,
    }

    fn harness(resolver: FakeResolver, sink: RecordingSink) -> Harness {
        let tmp = TempDir::new().unwrap();
        let mut config = RelayConfig::default();
        config.storage.data_dir = tmp.path().to_path_buf();
        config.discord.max_file_mb = 1;
        let sink = Arc::new(sink);
        let throttle = RelayThrottle::new(0, Duration::from_secs(60), CancellationToken::new()).shared();
        let relay = PushRelay::new(&config, Arc::new(resolver), sink.clone(), throttle);
        Harness {
            _tmp: tmp,
            sink,
            relay,
        }
    }

    fn resolver_for(ids: &[MessageId]) -> FakeResolver {
        ids.iter().fold(FakeResolver::default(), |r, id| {
            r.with_file(&format!("photo-{id}"), b"jpeg")
        })
    }

    #[tokio::test]
    async fn standalone_image_is_sent_immediately() {
        let h = harness(resolver_for(&[5]), RecordingSink::default());

        let report = h.relay.handle_message_at(Some(&photo(5, None, "hi")), 1000).await;

        assert_eq!(report.disposition, Disposition::Sent);
        let units = h.sink.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].ids, vec![5]);
        assert_eq!(units[0].names, vec!["photo-5.jpg".to_string()]);
        assert_eq!(units[0].caption, "hi");
        assert!(units[0].all_files_present);
        assert_eq!(std::fs::read_dir(&h.relay.inbox_dir).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn idle_group_is_flushed_by_unrelated_invocation() {
        let h = harness(resolver_for(&[1, 2]), RecordingSink::default());

        let first = h.relay.handle_message_at(Some(&photo(1, Some("G"), "album")), 100).await;
        let second = h.relay.handle_message_at(Some(&photo(2, Some("G"), "")), 101).await;
        assert_eq!(first.disposition, Disposition::Buffered { group_id: GroupId::from("G") });
        assert_eq!(second.sweep.still_open, 1);
        assert!(h.sink.units().is_empty());

        let third = h.relay.handle_message_at(Some(&text(3)), 104).await;

        assert_eq!(third.disposition, Disposition::Ignored);
        assert_eq!(third.sweep.flushed, 1);
        let units = h.sink.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].ids, vec![1, 2]);
        assert_eq!(units[0].caption, "album");
        assert!(h.relay.groups().read_record(&GroupId::from("G")).unwrap().is_none());
    }

    #[tokio::test]
    async fn event_without_message_still_sweeps() {
        let h = harness(resolver_for(&[1]), RecordingSink::default());
        h.relay.handle_message_at(Some(&photo(1, Some("G"), "")), 100).await;

        let report = h.relay.handle_message_at(None, 200).await;

        assert_eq!(report.disposition, Disposition::Ignored);
        assert_eq!(report.sweep.flushed, 1);
    }

    #[tokio::test]
    async fn retrieval_failure_skips_message() {
        let h = harness(FakeResolver::default(), RecordingSink::default());
        let report = h.relay.handle_message_at(Some(&photo(9, None, "")), 100).await;
        assert_eq!(report.disposition, Disposition::DownloadFailed);
        assert!(h.sink.units().is_empty());
    }

    #[tokio::test]
    async fn oversized_media_is_skipped() {
        let big = vec![0u8; 1024 * 1024 + 1];
        let h = harness(
            FakeResolver::default().with_file("photo-4", &big),
            RecordingSink::default(),
        );
        let report = h.relay.handle_message_at(Some(&photo(4, None, "")), 100).await;
        assert_eq!(report.disposition, Disposition::Skipped { bytes: big.len() as u64 });
        assert!(h.sink.units().is_empty());
    }

    #[tokio::test]
    async fn non_image_document_is_ignored() {
        let h = harness(resolver_for(&[7]), RecordingSink::default());
        let pdf = Message {
            media: Some(MediaDescriptor::Document {
                file_ref: "photo-7".into(),
                mime_type: Some("application/pdf".into()),
                file_name: Some("doc.pdf".into()),
                file_size: None,
            }),
            ..photo(7, None, "")
        };
        let report = h.relay.handle_message_at(Some(&pdf), 100).await;
        assert_eq!(report.disposition, Disposition::Ignored);
    }

    #[tokio::test]
    async fn sink_failure_is_reported_and_cleaned_up() {
        let h = harness(resolver_for(&[5]), RecordingSink::failing());
        let report = h.relay.handle_message_at(Some(&photo(5, None, "")), 100).await;
        assert_eq!(report.disposition, Disposition::SendFailed);
        assert_eq!(std::fs::read_dir(&h.relay.inbox_dir).unwrap().count(), 0);
    }
}
