//! Cancellation flag for long-running derivation and migration work.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token that can be cloned and shared with a worker thread.
///
/// Workers poll [`CancelToken::is_cancelled`] between units of work; nothing
/// is interrupted preemptively.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Reset the token to the non-cancelled state.
    ///
    /// Only call this when no worker from the previous run still holds it.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }
}
