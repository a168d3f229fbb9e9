//! Cooperative cancellation signal checked at safe points

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for dispatched jobs.
///
/// Workers check the flag at safe points (between row batches, between
/// sub-ranges) and abandon the run cleanly; nothing half-committed is left
/// behind because checks only happen on batch boundaries.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
