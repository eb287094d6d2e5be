//! Storage backends for the orchestration core.
//!
//! Both backends implement every trait in [`crate::traits`]. Postgres is what production runs on; the memory backend
//! reproduces its session-lock semantics in-process for tests and single-node development.
use std::sync::atomic::{AtomicU32, Ordering};

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Counts a caller as waiting for a pooled connection for as long as it is alive, so the count stays correct even
/// if the checkout future is dropped mid-wait.
pub(crate) struct WaitingGuard<'a>(&'a AtomicU32);

impl<'a> WaitingGuard<'a> {
    /// Starts counting only if the caller is about to block, i.e. no connection is free right now.
    pub(crate) fn when_blocked(blocked: bool, counter: &'a AtomicU32) -> Option<Self> {
        blocked.then(|| {
            counter.fetch_add(1, Ordering::SeqCst);
            Self(counter)
        })
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
