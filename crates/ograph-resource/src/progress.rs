use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives progress of a long save or load and can request cancellation.
pub trait ProgressTracker: Send + Sync {
    /// Returns `true` once the operation should stop.
    fn check_cancellation(&self) -> bool;

    fn report_progress(&self, done: u64, total: u64, message: &str);
}

/// Tracker that never cancels and ignores progress.
pub struct NullProgress;

impl ProgressTracker for NullProgress {
    fn check_cancellation(&self) -> bool {
        false
    }

    fn report_progress(&self, _done: u64, _total: u64, _message: &str) {}
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl ProgressTracker for CancellationFlag {
    fn check_cancellation(&self) -> bool {
        self.is_cancelled()
    }

    fn report_progress(&self, _done: u64, _total: u64, _message: &str) {}
}
