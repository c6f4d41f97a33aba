//! Process-level propagation counters.
//!
//! One `Metrics` instance is shared by every dispatcher; the gateway
//! serves point-in-time snapshots of it. Counters only ever increase.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct Metrics {
    jobs_started: AtomicU64,
    jobs_finished: AtomicU64,
    targets_started: AtomicU64,
    targets_succeeded: AtomicU64,
    targets_skipped: AtomicU64,
    targets_failed: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_finished: u64,
    pub targets_started: u64,
    pub targets_succeeded: u64,
    pub targets_skipped: u64,
    pub targets_failed: u64,
    pub retries: u64,
}

impl Metrics {
    pub fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_finished(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target_started(&self) {
        self.targets_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target_succeeded(&self) {
        self.targets_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target_skipped(&self) {
        self.targets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn target_failed(&self) {
        self.targets_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_finished: self.jobs_finished.load(Ordering::Relaxed),
            targets_started: self.targets_started.load(Ordering::Relaxed),
            targets_succeeded: self.targets_succeeded.load(Ordering::Relaxed),
            targets_skipped: self.targets_skipped.load(Ordering::Relaxed),
            targets_failed: self.targets_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}
