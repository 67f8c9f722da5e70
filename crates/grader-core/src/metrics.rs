//! Global atomic counters for grader observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event at the end of an evaluation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters; no allocations, no locking.
pub struct Metrics {
    tests_executed: AtomicU64,
    tests_rejected: AtomicU64,
    judgments_dispatched: AtomicU64,
    judgments_degraded: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tests_executed: AtomicU64::new(0),
            tests_rejected: AtomicU64::new(0),
            judgments_dispatched: AtomicU64::new(0),
            judgments_degraded: AtomicU64::new(0),
        }
    }

    /// A test script was spawned (whatever its outcome).
    pub fn inc_tests_executed(&self) {
        self.tests_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tests_executed", "counter incremented");
    }

    /// A test script was refused before execution (unsafe path, missing file).
    pub fn inc_tests_rejected(&self) {
        self.tests_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tests_rejected", "counter incremented");
    }

    pub fn inc_judgments_dispatched(&self) {
        self.judgments_dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judgments_dispatched", "counter incremented");
    }

    pub fn inc_judgments_degraded(&self) {
        self.judgments_degraded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "judgments_degraded", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            tests_executed = self.tests_executed(),
            tests_rejected = self.tests_rejected(),
            judgments_dispatched = self.judgments_dispatched(),
            judgments_degraded = self.judgments_degraded(),
        );
    }

    pub fn tests_executed(&self) -> u64 {
        self.tests_executed.load(Ordering::Relaxed)
    }

    pub fn tests_rejected(&self) -> u64 {
        self.tests_rejected.load(Ordering::Relaxed)
    }

    pub fn judgments_dispatched(&self) -> u64 {
        self.judgments_dispatched.load(Ordering::Relaxed)
    }

    pub fn judgments_degraded(&self) -> u64 {
        self.judgments_degraded.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.tests_executed.store(0, Ordering::Relaxed);
        self.tests_rejected.store(0, Ordering::Relaxed);
        self.judgments_dispatched.store(0, Ordering::Relaxed);
        self.judgments_degraded.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        assert_eq!(m.tests_executed(), 0);
        m.inc_tests_executed();
        m.inc_tests_executed();
        assert_eq!(m.tests_executed(), 2);

        m.inc_tests_rejected();
        assert_eq!(m.tests_rejected(), 1);

        m.inc_judgments_dispatched();
        m.inc_judgments_dispatched();
        m.inc_judgments_degraded();
        assert_eq!(m.judgments_dispatched(), 2);
        assert_eq!(m.judgments_degraded(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_tests_executed();
        m.inc_tests_rejected();
        m.inc_judgments_dispatched();
        m.inc_judgments_degraded();
        m.reset();
        assert_eq!(m.tests_executed(), 0);
        assert_eq!(m.tests_rejected(), 0);
        assert_eq!(m.judgments_dispatched(), 0);
        assert_eq!(m.judgments_degraded(), 0);
    }
}
