//! Coordination between long-running jobs and the consistency checker.
//!
//! Sync cycles and bulk imports hold a [`BusyGuard`] while they run; the
//! periodic checker skips its pass while any guard is alive so it never
//! audits a graph that is halfway through a batch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts running jobs that should keep the checker away.
#[derive(Debug, Default, Clone)]
pub struct MaintenanceGate {
    active: Arc<AtomicUsize>,
}

impl MaintenanceGate {
    /// Creates an idle gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a job as running until the guard is dropped.
    #[must_use = "the job counts as running only while the guard is held"]
    pub fn enter(&self) -> BusyGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        BusyGuard {
            active: Arc::clone(&self.active),
        }
    }

    /// Whether any guard is held.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) > 0
    }

    /// Number of guards held.
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Held by a running sync or import.
#[derive(Debug)]
pub struct BusyGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
