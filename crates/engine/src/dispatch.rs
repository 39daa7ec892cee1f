use {
    albumrelay_common::sink::RelaySink,
    tracing::{debug, error, info},
};

use crate::{buffer::PendingUnit, scratch::remove_quietly};

/// Result of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { files: usize },
    Failed,
}

/// Send one unit and delete every member's local copy, whatever the outcome.
///
/// No retry: a failed unit is logged and counted as dispatched-but-lost.
pub async fn dispatch_unit(sink: &dyn RelaySink, unit: PendingUnit) -> DispatchOutcome {
    let PendingUnit {
        group_id,
        caption,
        files,
        overflow,
    } = unit;

    for extra in &overflow {
        debug!(
            message_id = extra.message_id,
            group_id = ?group_id.as_ref().map(|g| g.as_str()),
            "dropping album member beyond the per-unit file cap"
        );
        remove_quietly(&extra.path);
    }

    let first_id = files.first().map(|f| f.message_id).unwrap_or_default();
    let outcome = match sink.send_unit(&files, &caption).await {
        Ok(()) => {
            info!(
                message_id = first_id,
                group_id = ?group_id.as_ref().map(|g| g.as_str()),
                files = files.len(),
                "relayed unit"
            );
            DispatchOutcome::Sent { files: files.len() }
        },
        Err(e) => {
            error!(
                message_id = first_id,
                group_id = ?group_id.as_ref().map(|g| g.as_str()),
                files = files.len(),
                error = %e,
                "relay failed, unit dropped"
            );
            DispatchOutcome::Failed
        },
    };

    for file in &files {
        remove_quietly(&file.path);
    }
    outcome
}
