//! In-memory, append-only job store.
//!
//! Writers are the dispatcher (progress, terminal transitions) and the
//! engine facade (job creation). Readers take consistent snapshots: every
//! update happens under one short write lock, and a snapshot is a clone
//! taken under the read lock, so the count invariants hold at every
//! observable instant.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tokio::sync::RwLock;

use schemacast_core::outcome::Outcome;

use crate::job::{Job, JobCounts, JobStatus, TargetRecord};

/// Finalized jobs retained before the oldest are evicted. Running jobs
/// are never evicted.
pub const MAX_FINISHED_JOBS: usize = 500;

#[derive(Default)]
struct StoreInner {
    jobs: HashMap<String, JobEntry>,
    /// Finalization order, oldest first; drives retention.
    finished: VecDeque<String>,
}

struct JobEntry {
    job: Job,
    /// Databases currently waiting out a retry backoff.
    retrying_now: HashSet<String>,
}

/// Thread-safe job registry for the process lifetime.
pub struct JobStore {
    inner: RwLock<StoreInner>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    /// Register a freshly created job.
    pub async fn create(&self, job: Job) {
        let mut inner = self.inner.write().await;
        inner.jobs.insert(
            job.job_id.clone(),
            JobEntry {
                job,
                retrying_now: HashSet::new(),
            },
        );
    }

    /// Transition a pending job to running.
    pub async fn mark_running(&self, job_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.jobs.get_mut(job_id) {
            if entry.job.status == JobStatus::Pending {
                entry.job.status = JobStatus::Running;
            }
        }
    }

    /// Transition a running job to stopping (cancel or breaker observed).
    pub async fn mark_stopping(&self, job_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.jobs.get_mut(job_id) {
            if entry.job.status == JobStatus::Running {
                entry.job.status = JobStatus::Stopping;
            }
        }
    }

    /// Record that a target worker was handed a target.
    pub async fn record_started(&self, job_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.jobs.get_mut(job_id) {
            entry.job.counts.started += 1;
        }
    }

    /// Record that a target entered retry backoff.
    pub async fn record_retrying(&self, job_id: &str, database: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.jobs.get_mut(job_id) {
            entry.retrying_now.insert(database.to_string());
            entry.job.counts.retrying = entry.retrying_now.len();
        }
    }

    /// Record a terminal outcome for one target and return the counts
    /// after the update.
    pub async fn record_outcome(
        &self,
        job_id: &str,
        database: &str,
        outcome: &Outcome,
    ) -> Option<JobCounts> {
        let mut inner = self.inner.write().await;
        let entry = inner.jobs.get_mut(job_id)?;

        match outcome {
            Outcome::Succeeded { .. } => entry.job.counts.succeeded += 1,
            Outcome::Skipped { .. } => entry.job.counts.skipped += 1,
            Outcome::Failed { .. } => entry.job.counts.failed += 1,
        }
        entry.retrying_now.remove(database);
        entry.job.counts.retrying = entry.retrying_now.len();
        entry.job.push_recent(TargetRecord {
            database: database.to_string(),
            outcome: outcome.clone(),
            finished_at: Utc::now(),
        });

        Some(entry.job.counts)
    }

    /// Write the terminal status. Returns `false` (and changes nothing)
    /// if the job is unknown or already terminal: the terminal transition
    /// happens exactly once.
    pub async fn finalize(&self, job_id: &str, status: JobStatus) -> bool {
        debug_assert!(status.is_terminal());

        let mut inner = self.inner.write().await;
        let Some(entry) = inner.jobs.get_mut(job_id) else {
            return false;
        };
        if entry.job.status.is_terminal() {
            tracing::warn!(
                job_id,
                current = ?entry.job.status,
                attempted = ?status,
                "Ignoring second terminal transition",
            );
            return false;
        }

        entry.job.status = status;
        entry.job.finished_at = Some(Utc::now());
        inner.finished.push_back(job_id.to_string());

        while inner.finished.len() > MAX_FINISHED_JOBS {
            if let Some(evicted) = inner.finished.pop_front() {
                inner.jobs.remove(&evicted);
            }
        }
        true
    }

    /// Consistent point-in-time snapshot of one job.
    pub async fn snapshot(&self, job_id: &str) -> Option<Job> {
        let inner = self.inner.read().await;
        inner.jobs.get(job_id).map(|entry| entry.job.clone())
    }

    /// Snapshot of every retained job, newest first.
    pub async fn list(&self) -> Vec<Job> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner.jobs.values().map(|entry| entry.job.clone()).collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use schemacast_core::outcome::{ErrorKind, SkipReason};
    use schemacast_core::policy::PropagationPolicy;

    fn job(job_id: &str, targets: usize) -> Job {
        let names: Vec<String> = (0..targets).map(|i| format!("cmp_{i}")).collect();
        Job::new(
            job_id,
            "v1",
            PropagationPolicy::default(),
            Arc::new(names),
        )
    }

    #[tokio::test]
    async fn snapshot_reflects_recorded_progress() {
        let store = JobStore::new();
        store.create(job("j1", 3)).await;
        store.mark_running("j1").await;

        store.record_started("j1").await;
        store
            .record_outcome(
                "j1",
                "cmp_0",
                &Outcome::Succeeded {
                    duration: Duration::from_millis(5),
                },
            )
            .await;

        let snap = store.snapshot("j1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Running);
        assert_eq!(snap.counts.started, 1);
        assert_eq!(snap.counts.succeeded, 1);
        assert_eq!(snap.counts.completed(), 1);
        assert_eq!(snap.recent.len(), 1);
        // Invariants from the data model.
        assert!(snap.counts.started >= snap.counts.completed());
        assert!(snap.counts.completed() <= snap.counts.total);
    }

    #[tokio::test]
    async fn retrying_count_tracks_backoff_and_clears_on_terminal() {
        let store = JobStore::new();
        store.create(job("j1", 2)).await;

        store.record_retrying("j1", "cmp_0").await;
        store.record_retrying("j1", "cmp_0").await;
        store.record_retrying("j1", "cmp_1").await;
        assert_eq!(store.snapshot("j1").await.unwrap().counts.retrying, 2);

        store
            .record_outcome(
                "j1",
                "cmp_0",
                &Outcome::Failed {
                    kind: ErrorKind::Connect,
                    error: "connection refused".to_string(),
                    attempts: 4,
                },
            )
            .await;
        assert_eq!(store.snapshot("j1").await.unwrap().counts.retrying, 1);
    }

    #[tokio::test]
    async fn terminal_transition_happens_once() {
        let store = JobStore::new();
        store.create(job("j1", 1)).await;
        store.mark_running("j1").await;

        assert!(store.finalize("j1", JobStatus::Succeeded).await);
        assert!(!store.finalize("j1", JobStatus::Failed).await);

        let snap = store.snapshot("j1").await.unwrap();
        assert_eq!(snap.status, JobStatus::Succeeded);
        assert!(snap.finished_at.is_some());
    }

    #[tokio::test]
    async fn stopping_only_applies_to_running_jobs() {
        let store = JobStore::new();
        store.create(job("j1", 1)).await;

        store.mark_stopping("j1").await;
        assert_eq!(store.snapshot("j1").await.unwrap().status, JobStatus::Pending);

        store.mark_running("j1").await;
        store.mark_stopping("j1").await;
        assert_eq!(
            store.snapshot("j1").await.unwrap().status,
            JobStatus::Stopping
        );
    }

    #[tokio::test]
    async fn finished_jobs_are_evicted_beyond_cap() {
        let store = JobStore::new();
        for i in 0..MAX_FINISHED_JOBS + 5 {
            let id = format!("j{i}");
            store.create(job(&id, 1)).await;
            store.mark_running(&id).await;
            store.finalize(&id, JobStatus::Succeeded).await;
        }

        assert!(store.snapshot("j0").await.is_none());
        assert!(store.snapshot("j4").await.is_none());
        assert!(store.snapshot("j5").await.is_some());
        assert_eq!(store.list().await.len(), MAX_FINISHED_JOBS);
    }

    #[tokio::test]
    async fn running_jobs_survive_retention() {
        let store = JobStore::new();
        store.create(job("running", 1)).await;
        store.mark_running("running").await;

        for i in 0..MAX_FINISHED_JOBS + 5 {
            let id = format!("j{i}");
            store.create(job(&id, 1)).await;
            store.mark_running(&id).await;
            store.finalize(&id, JobStatus::Succeeded).await;
        }

        assert!(store.snapshot("running").await.is_some());
    }

    #[tokio::test]
    async fn skipped_outcome_counts_as_skipped() {
        let store = JobStore::new();
        store.create(job("j1", 1)).await;
        store.record_started("j1").await;
        store
            .record_outcome(
                "j1",
                "cmp_0",
                &Outcome::Skipped {
                    reason: SkipReason::SameChecksum,
                },
            )
            .await;

        let counts = store.snapshot("j1").await.unwrap().counts;
        assert_eq!(counts.skipped, 1);
        assert_eq!(counts.succeeded, 0);
        assert_eq!(counts.failed, 0);
    }
}
