//! Pull-mode history pagination.

use {
    albumrelay_common::{
        Result as CommonResult,
        source::MessageSource,
        types::{Message, MessageId},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// One page of history, ascending by identifier, all newer than the floor it
/// was fetched from.
#[derive(Debug)]
pub struct Page {
    pub messages: Vec<Message>,
}

impl Page {
    pub fn max_id(&self) -> Option<MessageId> {
        self.messages.last().map(|m| m.id)
    }
}

/// Walks a channel forward from a floor identifier in fixed-size pages.
///
/// The floor only moves after the caller has consumed a whole page, so a
/// crash mid-page never skips unseen messages with smaller identifiers.
pub struct HistoryWalker<'a> {
    source: &'a dyn MessageSource,
    floor: MessageId,
    page_size: usize,
}

impl<'a> HistoryWalker<'a> {
    pub fn new(source: &'a dyn MessageSource, start: MessageId, page_size: usize) -> Self {
        Self {
            source,
            floor: start,
            page_size: page_size.max(1),
        }
    }

    /// Every message at or below the floor has been consumed.
    pub fn floor(&self) -> MessageId {
        self.floor
    }

    /// Fetch the next page above the floor. `None` once the source returns an
    /// empty page.
    pub async fn next_page(&self) -> CommonResult<Option<Page>> {
        let mut messages = self.source.fetch_after(self.floor, self.page_size).await?;
        if messages.is_empty() {
            return Ok(None);
        }
        let fetched = messages.len();
        messages.retain(|m| m.id > self.floor);
        messages.sort_by_key(|m| m.id);
        messages.dedup_by_key(|m| m.id);
        debug!(
            floor = self.floor,
            fetched,
            kept = messages.len(),
            "fetched history page"
        );
        Ok(Some(Page { messages }))
    }

    /// Raise the floor after a page was fully consumed. Returns `false` when
    /// the floor did not move, which means the walk can make no progress.
    pub fn advance(&mut self, max_seen: MessageId) -> bool {
        if max_seen <= self.floor {
            return false;
        }
        self.floor = max_seen;
        true
    }
}

/// Find where to start when there is no checkpoint and no explicit start.
///
/// Without a time filter the walk starts from the oldest message (0). With one,
/// history is scanned backward from the newest message until a page lies
/// entirely before `since`; the resume point is one below the oldest message
/// at or after `since`. When no message qualifies the newest identifier is
/// returned so that nothing is relayed.
pub async fn locate_start(
    source: &dyn MessageSource,
    since: Option<i64>,
    page_size: usize,
    cancel: &CancellationToken,
) -> CommonResult<MessageId> {
    let Some(since) = since.filter(|s| *s > 0) else {
        return Ok(0);
    };

    let mut offset_id: MessageId = 0;
    let mut newest: Option<MessageId> = None;
    let mut oldest: Option<MessageId> = None;
    let mut boundary: Option<MessageId> = None;

    while !cancel.is_cancelled() {
        let page = source.fetch_before(offset_id, page_size.max(1)).await?;
        let Some(page_min) = page.iter().map(|m| m.id).min() else {
            break;
        };
        if let Some(page_max) = page.iter().map(|m| m.id).max() {
            newest = Some(newest.map_or(page_max, |n| n.max(page_max)));
        }
        oldest = Some(oldest.map_or(page_min, |o| o.min(page_min)));

        for message in page.iter().filter(|m| m.date >= since) {
            boundary = Some(boundary.map_or(message.id, |b| b.min(message.id)));
        }

        if page.iter().all(|m| m.date < since) {
            break;
        }
        if offset_id != 0 && page_min >= offset_id {
            break;
        }
        offset_id = page_min;
    }

    let start = match (boundary, newest) {
        (Some(boundary), _) => boundary - 1,
        (None, Some(newest)) => newest,
        (None, None) => 0,
    };
    info!(
        since,
        oldest_seen = ?oldest,
        resume_from = start,
        "located start of history window"
    );
    Ok(start)
}
