//! Cooperative cancellation shared between a session's worker threads.
//!
//! Generalizes the `Arc<AtomicBool>` stop-flag pattern used ad hoc by
//! individual backends into one type every worker (transfer engine, video
//! sidecar, playback engine, broadcast hub) checks on every pump iteration
//! and every sleep.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// A cheaply cloneable flag that tells cooperating workers to stop.
///
/// `CancellationToken` never blocks and never panics; `stop()` is
/// idempotent, so repeated calls are equivalent to one.
#[derive(Clone, Default)]
pub struct CancellationToken {
    stopped: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from any thread, any number of
    /// times, including before the workers that check it have started.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `dur`, returning early if cancellation is requested during
    /// the sleep. Returns `true` if cancelled, `false` if the full duration
    /// elapsed.
    ///
    /// Polls in small slices so a `stop()` call is observed promptly rather
    /// than after a long uninterruptible sleep.
    pub fn sleep(&self, dur: std::time::Duration) -> bool {
        const SLICE: std::time::Duration = std::time::Duration::from_millis(10);
        let mut remaining = dur;
        while remaining > std::time::Duration::ZERO {
            if self.is_cancelled() {
                return true;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        self.is_cancelled()
    }
}
