//! Media aggregation and throttled relay engine.
//!
//! Walks a channel's history (pull mode) or handles one inbound event at a
//! time (push mode), buffers album members until the album is complete, and
//! relays each finished unit to the sink under a sliding-window rate limit.
//! Progress is persisted so a restart neither re-sends nor silently skips.

pub mod buffer;
pub mod checkpoint;
pub mod classify;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod group_store;
pub mod push;
pub mod scratch;
pub mod throttle;
pub mod walker;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    buffer::{GroupBuffer, PendingUnit, RelayItem},
    checkpoint::CheckpointStore,
    error::{Error, Result},
    export::{ExportOptions, ExportSummary, Exporter, StopReason},
    group_store::{GroupStore, SweepReport},
    push::{Disposition, PushRelay, PushReport},
    throttle::{Acquire, RelayThrottle, SharedThrottle},
};
