//! Sliding-window limit on outbound relay units.

use std::{sync::Arc, time::Duration};

use {
    tokio::time::Instant,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

/// Throttle shared by concurrent push-mode invocations in one process.
pub type SharedThrottle = Arc<tokio::sync::Mutex<RelayThrottle>>;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Allowed,
    Wait(Duration),
}

/// Outcome of [`RelayThrottle::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Granted,
    /// Termination was requested while waiting for the window to reset.
    Cancelled,
}

/// Allows at most `limit` relay units per `period`. A limit of zero disables
/// throttling.
pub struct RelayThrottle {
    limit: u32,
    period: Duration,
    window: WindowState,
    cancel: CancellationToken,
}

impl RelayThrottle {
    pub fn new(limit: u32, period: Duration, cancel: CancellationToken) -> Self {
        Self {
            limit,
            period,
            window: WindowState {
                started_at: Instant::now(),
                count: 0,
            },
            cancel,
        }
    }

    pub fn shared(self) -> SharedThrottle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Units counted in the current window.
    pub fn window_count(&self) -> u32 {
        self.window.count
    }

    /// Wait until one more unit may be dispatched. Call once per unit.
    pub async fn acquire(&mut self) -> Acquire {
        if self.cancel.is_cancelled() {
            return Acquire::Cancelled;
        }
        let remaining = match self.check_at(Instant::now()) {
            Decision::Allowed => return Acquire::Granted,
            Decision::Wait(remaining) => remaining,
        };

        info!(
            wait_ms = remaining.as_millis() as u64,
            limit = self.limit,
            "relay rate limit reached, waiting for the window to reset"
        );
        tokio::select! {
            () = self.cancel.cancelled() => {
                debug!("throttle wait interrupted by termination request");
                return Acquire::Cancelled;
            },
            () = tokio::time::sleep(remaining) => {},
        }

        self.window = WindowState {
            started_at: Instant::now(),
            count: 1,
        };
        Acquire::Granted
    }

    fn check_at(&mut self, now: Instant) -> Decision {
        if self.limit == 0 {
            return Decision::Allowed;
        }
        let elapsed = now.saturating_duration_since(self.window.started_at);
        if elapsed >= self.period {
            self.window = WindowState {
                started_at: now,
                count: 1,
            };
            Decision::Allowed
        } else if self.window.count < self.limit {
            self.window.count += 1;
            Decision::Allowed
        } else {
            Decision::Wait(self.period.saturating_sub(elapsed))
        }
    }
}
