//! Session cancellation flag.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Cooperative stop flag shared between a stop request and the tool-call path.
///
/// Clones observe the same flag. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the session stopped.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Release);
    }

    /// Clear a stop request.
    pub fn reset(&self) {
        self.inner.store(false, Ordering::Release);
    }

    /// Whether the session has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}
