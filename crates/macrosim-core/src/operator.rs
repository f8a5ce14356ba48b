//! Operator control shared between a running Circuit and its host.
//!
//! The host (a signal handler, a UI thread, a watchdog) holds a clone of
//! the [`AbortHandle`] and raises it; the Circuit checks it between ticks,
//! never inside one, so a tick is atomic with respect to cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Clonable, thread-safe abort flag.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the run to stop before its next tick.
    pub fn abort(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        assert!(!handle.is_aborted());
        remote.abort();
        assert!(handle.is_aborted());
    }

    #[test]
    fn raised_from_another_thread() {
        let handle = AbortHandle::new();
        let remote = handle.clone();
        let joined = std::thread::spawn(move || remote.abort()).join();
        assert!(joined.is_ok());
        assert!(handle.is_aborted());
    }
}
