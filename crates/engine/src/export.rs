//! Pull-mode aggregation loop.
//!
//! Walks a channel's history in ascending identifier order, groups album
//! members, relays each finished unit under the rate limit, and advances the
//! checkpoint past every unit it attempted.

use std::path::{Path, PathBuf};

use {
    albumrelay_common::{
        sink::RelaySink,
        source::MessageSource,
        types::{Message, MessageId},
    },
    albumrelay_config::RelayConfig,
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

use crate::{
    buffer::{GroupBuffer, PendingUnit, RelayItem},
    checkpoint::CheckpointStore,
    classify::{Classification, classify},
    dispatch::{DispatchOutcome, dispatch_unit},
    error::{Context, Result},
    scratch::{prepare_dir, remove_quietly},
    throttle::{Acquire, RelayThrottle},
    walker::{HistoryWalker, Page, locate_start},
};

/// Per-run parameters from the command line.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Skip messages dated before this unix timestamp.
    pub since: Option<i64>,
    /// Stop after this many units were dispatched. Zero means no limit.
    pub unit_limit: usize,
    /// Resume point overriding the checkpoint.
    pub start_id: Option<MessageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    /// A page did not move the cursor.
    NoProgress,
    UnitLimit,
    Terminated,
    /// Page fetches kept failing after every retry.
    SourceUnavailable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::EndOfStream => "end of history",
            Self::NoProgress => "no progress",
            Self::UnitLimit => "unit limit reached",
            Self::Terminated => "terminated",
            Self::SourceUnavailable => "source unavailable",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub start: MessageId,
    pub units_sent: usize,
    pub units_failed: usize,
    pub files_sent: usize,
    pub skipped: usize,
    pub last_checkpoint: MessageId,
    pub stop: StopReason,
}

impl ExportSummary {
    pub fn units_dispatched(&self) -> usize {
        self.units_sent + self.units_failed
    }
}

enum Fetch {
    Page(Page),
    End,
    Unavailable,
    Cancelled,
}

pub struct Exporter<'a> {
    config: &'a RelayConfig,
    source: &'a dyn MessageSource,
    sink: &'a dyn RelaySink,
    checkpoint: &'a CheckpointStore,
    cancel: CancellationToken,
}

impl<'a> Exporter<'a> {
    pub fn new(
        config: &'a RelayConfig,
        source: &'a dyn MessageSource,
        sink: &'a dyn RelaySink,
        checkpoint: &'a CheckpointStore,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            sink,
            checkpoint,
            cancel,
        }
    }

    /// Explicit start, else the saved checkpoint, else a located start.
    pub async fn resolve_start(&self, opts: &ExportOptions) -> Result<MessageId> {
        if let Some(start) = opts.start_id {
            info!(start, "resuming from explicit identifier");
            return Ok(start.max(0));
        }
        let saved = self.checkpoint.load();
        if saved > 0 {
            info!(start = saved, "resuming from checkpoint");
            return Ok(saved);
        }
        Ok(locate_start(
            self.source,
            opts.since,
            self.config.relay.page_size,
            &self.cancel,
        )
        .await?)
    }

    pub async fn run(&self, opts: &ExportOptions) -> Result<ExportSummary> {
        let scratch = self.config.storage.scratch_dir();
        let purged = prepare_dir(&scratch)
            .with_context(|| format!("prepare scratch dir {}", scratch.display()))?;
        if purged > 0 {
            info!(purged, dir = %scratch.display(), "removed leftovers of an interrupted run");
        }

        let start = self.resolve_start(opts).await?;
        let mut run = Run {
            exporter: self,
            opts,
            scratch,
            throttle: RelayThrottle::new(
                self.config.relay.max_units_per_window,
                self.config.relay.window(),
                self.cancel.clone(),
            ),
            buffer: GroupBuffer::new(),
            last_saved: start,
            summary: ExportSummary {
                start,
                units_sent: 0,
                units_failed: 0,
                files_sent: 0,
                skipped: 0,
                last_checkpoint: start,
                stop: StopReason::EndOfStream,
            },
        };
        run.walk(start).await;

        let summary = run.summary;
        info!(
            start = summary.start,
            units_sent = summary.units_sent,
            units_failed = summary.units_failed,
            files_sent = summary.files_sent,
            skipped = summary.skipped,
            checkpoint = summary.last_checkpoint,
            stop = %summary.stop,
            "export finished"
        );
        Ok(summary)
    }
}

/// State owned by one export run.
struct Run<'r, 'a> {
    exporter: &'r Exporter<'a>,
    opts: &'r ExportOptions,
    scratch: PathBuf,
    throttle: RelayThrottle,
    buffer: GroupBuffer,
    last_saved: MessageId,
    summary: ExportSummary,
}

impl Run<'_, '_> {
    fn cancelled(&self) -> bool {
        self.exporter.cancel.is_cancelled()
    }

    fn limit_reached(&self) -> bool {
        self.opts.unit_limit > 0 && self.summary.units_dispatched() >= self.opts.unit_limit
    }

    async fn walk(&mut self, start: MessageId) {
        let relay = &self.exporter.config.relay;
        let mut walker = HistoryWalker::new(self.exporter.source, start, relay.page_size);

        let stop = 'pages: loop {
            if self.cancelled() {
                break StopReason::Terminated;
            }
            let page = match self.fetch_page(&walker).await {
                Fetch::Page(page) => page,
                Fetch::End => break StopReason::EndOfStream,
                Fetch::Unavailable => break StopReason::SourceUnavailable,
                Fetch::Cancelled => break StopReason::Terminated,
            };
            let Some(page_max) = page.max_id() else {
                warn!(floor = walker.floor(), "page held nothing above the cursor, stopping");
                break StopReason::NoProgress;
            };

            for message in &page.messages {
                if self.cancelled() {
                    break 'pages StopReason::Terminated;
                }
                let Some(item) = self.materialize(message).await else {
                    continue;
                };
                let mut units = self.buffer.offer(item).into_iter();
                while let Some(unit) = units.next() {
                    if let Some(stop) = self.dispatch(unit).await {
                        units.for_each(PendingUnit::discard);
                        break 'pages stop;
                    }
                }
            }

            if !walker.advance(page_max) {
                break StopReason::NoProgress;
            }
            if !self.buffer.is_open() {
                self.commit(page_max);
            }
        };

        self.summary.stop = stop;
        match stop {
            StopReason::EndOfStream | StopReason::NoProgress => {
                if let Some(unit) = self.buffer.close()
                    && let Some(stop) = self.dispatch(unit).await
                {
                    self.summary.stop = stop;
                    return;
                }
                self.commit(walker.floor());
            },
            StopReason::UnitLimit => {
                let dropped = self.buffer.discard();
                if dropped > 0 {
                    debug!(dropped, "discarded open group at unit limit");
                }
            },
            StopReason::Terminated | StopReason::SourceUnavailable => {
                if let Some(group_id) = self.buffer.open_group() {
                    info!(
                        group_id = %group_id,
                        members = self.buffer.len(),
                        "open group left unflushed; it was never checkpointed"
                    );
                }
            },
        }
    }

    async fn fetch_page(&self, walker: &HistoryWalker<'_>) -> Fetch {
        let relay = &self.exporter.config.relay;
        let attempts = relay.fetch_retries.saturating_add(1);
        for attempt in 1..=attempts {
            match walker.next_page().await {
                Ok(Some(page)) => return Fetch::Page(page),
                Ok(None) => return Fetch::End,
                Err(e) => {
                    warn!(attempt, attempts, floor = walker.floor(), error = %e, "history page fetch failed");
                    if attempt == attempts {
                        break;
                    }
                    tokio::select! {
                        () = self.exporter.cancel.cancelled() => return Fetch::Cancelled,
                        () = tokio::time::sleep(relay.fetch_backoff()) => {},
                    }
                },
            }
        }
        error!(floor = walker.floor(), "history unavailable, stopping");
        Fetch::Unavailable
    }

    /// Filter, classify and download one message. `None` when it is skipped.
    async fn materialize(&mut self, message: &Message) -> Option<RelayItem> {
        // Undated messages (date 0) are never filtered out.
        if let Some(since) = self.opts.since.filter(|s| *s > 0)
            && message.date > 0
            && message.date < since
        {
            self.summary.skipped += 1;
            return None;
        }
        let media = match message.media.as_ref() {
            Some(media) if classify(message) == Classification::Image => media,
            _ => {
                self.summary.skipped += 1;
                return None;
            },
        };

        let path = match self.exporter.source.download(message, &self.scratch).await {
            Ok(path) => path,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "download failed, message skipped");
                self.summary.skipped += 1;
                return None;
            },
        };

        let size = file_size(&path).await;
        let max = self.exporter.config.max_file_bytes();
        if size == 0 || size > max {
            warn!(message_id = message.id, bytes = size, limit = max, "media empty or too large, message skipped");
            remove_quietly(&path);
            self.summary.skipped += 1;
            return None;
        }

        let file_name = media.file_name_or(|| fallback_name(&path, message.id));
        Some(RelayItem {
            message_id: message.id,
            path,
            file_name,
            caption: message.caption_text().to_string(),
            group_id: message.group_id.clone(),
        })
    }

    /// Send one closed unit under the rate limit and checkpoint past it.
    /// Returns a stop reason when the walk must end.
    async fn dispatch(&mut self, unit: PendingUnit) -> Option<StopReason> {
        if self.limit_reached() {
            unit.discard();
            return Some(StopReason::UnitLimit);
        }
        if self.throttle.acquire().await == Acquire::Cancelled {
            unit.discard();
            return Some(StopReason::Terminated);
        }

        let highest = unit.highest_id();
        match dispatch_unit(self.exporter.sink, unit).await {
            DispatchOutcome::Sent { files } => {
                self.summary.units_sent += 1;
                self.summary.files_sent += files;
            },
            DispatchOutcome::Failed => self.summary.units_failed += 1,
        }
        self.commit(highest);

        self.limit_reached().then_some(StopReason::UnitLimit)
    }

    /// Persist `id` if it moves the cursor forward. Failures are logged only.
    fn commit(&mut self, id: MessageId) {
        if id <= self.last_saved {
            return;
        }
        match self.exporter.checkpoint.save(id) {
            Ok(()) => {
                self.last_saved = id;
                self.summary.last_checkpoint = id;
            },
            Err(e) => error!(checkpoint = id, error = %e, "failed to save checkpoint"),
        }
    }
}

async fn file_size(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

fn fallback_name(path: &Path, id: MessageId) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{id}.jpg"))
}
