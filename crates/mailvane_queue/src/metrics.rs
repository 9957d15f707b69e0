//! In-process queue metrics.
//!
//! Lock-free atomics, single global instance. Counters only; durable
//! statistics live in the KV and are computed by `Scheduler::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    pub tasks_enqueued: AtomicU64,
    pub tasks_leased: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_retried: AtomicU64,
    pub tasks_dead_lettered: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub leases_reaped: AtomicU64,
    pub dependents_enqueued: AtomicU64,
    pub dependents_dropped: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tasks_enqueued: AtomicU64::new(0),
            tasks_leased: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_retried: AtomicU64::new(0),
            tasks_dead_lettered: AtomicU64::new(0),
            tasks_cancelled: AtomicU64::new(0),
            leases_reaped: AtomicU64::new(0),
            dependents_enqueued: AtomicU64::new(0),
            dependents_dropped: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_leased: self.tasks_leased.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_dead_lettered: self.tasks_dead_lettered.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            leases_reaped: self.leases_reaped.load(Ordering::Relaxed),
            dependents_enqueued: self.dependents_enqueued.load(Ordering::Relaxed),
            dependents_dropped: self.dependents_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_enqueued: u64,
    pub tasks_leased: u64,
    pub tasks_completed: u64,
    pub tasks_retried: u64,
    pub tasks_dead_lettered: u64,
    pub tasks_cancelled: u64,
    pub leases_reaped: u64,
    pub dependents_enqueued: u64,
    pub dependents_dropped: u64,
}
