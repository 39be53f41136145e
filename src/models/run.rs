use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Success/failure tallies shared by the walker and every worker of a run.
#[derive(Debug, Default)]
pub struct RunCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl RunCounters {
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ocr_archive_tasks_succeeded_total").increment(1);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("ocr_archive_tasks_failed_total").increment(1);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Final summary of a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: u64,
    pub failed: u64,
    /// The run stopped taking new work before the walk finished.
    pub cancelled: bool,
    /// Set when directory traversal aborted early.
    pub traversal_error: Option<String>,
}
