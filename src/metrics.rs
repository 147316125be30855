//! Pipeline counters for the operator surface.
//!
//! Every per-record and per-window failure is recovered locally; these
//! counters are how the recoveries stay observable.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub records_ingested: AtomicU64,
    pub dropped_malformed: AtomicU64,
    pub late_arrivals: AtomicU64,
    pub windows_closed: AtomicU64,
    pub alerts_published: AtomicU64,
    pub alerts_degraded: AtomicU64,
    pub alerts_dead_lettered: AtomicU64,
}

/// Point-in-time copy of the counters, serializable for the status API.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub records_ingested: u64,
    pub dropped_malformed: u64,
    pub late_arrivals: u64,
    pub windows_closed: u64,
    pub alerts_published: u64,
    pub alerts_degraded: u64,
    pub alerts_dead_lettered: u64,
}

impl PipelineMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_ingested: self.records_ingested.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            late_arrivals: self.late_arrivals.load(Ordering::Relaxed),
            windows_closed: self.windows_closed.load(Ordering::Relaxed),
            alerts_published: self.alerts_published.load(Ordering::Relaxed),
            alerts_degraded: self.alerts_degraded.load(Ordering::Relaxed),
            alerts_dead_lettered: self.alerts_dead_lettered.load(Ordering::Relaxed),
        }
    }
}
