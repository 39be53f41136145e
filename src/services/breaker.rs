use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::warn;

/// Consecutive-failure counter that opens once `threshold` failures pile up in a row.
///
/// A success resets the count. Opening is one-way: later successes do not close it.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    consecutive: AtomicU32,
    open: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: AtomicU32::new(0),
            open: AtomicBool::new(false),
        }
    }

    pub fn record_success(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    /// Count one failure. Returns `true` when the post-increment count reached the
    /// threshold, i.e. the caller should stop issuing work.
    pub fn record_failure(&self) -> bool {
        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.threshold {
            return false;
        }
        if !self.open.swap(true, Ordering::SeqCst) {
            warn!(consecutive = count, threshold = self.threshold, "Circuit breaker opened");
            metrics::counter!("ocr_archive_circuit_trips_total").increment(1);
        }
        true
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }
}
