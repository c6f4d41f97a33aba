//! Job records: the immutable header plus mutable progress.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use schemacast_core::outcome::Outcome;
use schemacast_core::policy::PropagationPolicy;

/// How many per-target outcomes a job retains for inspection. Older
/// outcomes remain visible only as counts.
pub const RECENT_OUTCOMES: usize = 50;

/// Lifecycle of a propagation job. Exactly one terminal state is ever
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, dispatcher not yet running.
    Pending,
    /// Dispatcher is scheduling targets.
    Running,
    /// Cancel or circuit breaker observed; draining in-flight workers.
    Stopping,
    /// Finished with zero failures.
    Succeeded,
    /// Finished normally with failures below the threshold.
    Failed,
    /// Circuit breaker fired.
    Aborted,
    /// Stopped by an external signal before completion.
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Aborted | JobStatus::Cancelled
        )
    }
}

/// Aggregated per-target progress counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub started: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Targets currently waiting out a retry backoff.
    pub retrying: usize,
}

impl JobCounts {
    /// Targets that have reached a terminal outcome.
    pub fn completed(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

/// One target's terminal outcome, kept in the job's recent ring.
#[derive(Debug, Clone, Serialize)]
pub struct TargetRecord {
    pub database: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub finished_at: DateTime<Utc>,
}

/// A propagation job: immutable header plus mutable progress.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub version_id: String,
    pub policy: PropagationPolicy,
    /// Target list resolved at submission; not serialized (it can run to
    /// six figures), the names surface through progress events instead.
    #[serde(skip)]
    pub targets: Arc<Vec<String>>,
    pub status: JobStatus,
    pub counts: JobCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Ring of the most recent per-target outcomes.
    pub recent: VecDeque<TargetRecord>,
}

impl Job {
    pub fn new(
        job_id: impl Into<String>,
        version_id: impl Into<String>,
        policy: PropagationPolicy,
        targets: Arc<Vec<String>>,
    ) -> Self {
        let counts = JobCounts {
            total: targets.len(),
            ..Default::default()
        };
        Self {
            job_id: job_id.into(),
            version_id: version_id.into(),
            policy,
            targets,
            status: JobStatus::Pending,
            counts,
            started_at: Utc::now(),
            finished_at: None,
            recent: VecDeque::with_capacity(RECENT_OUTCOMES),
        }
    }

    /// Append a terminal outcome to the recent ring, evicting the oldest
    /// entry once full.
    pub(crate) fn push_recent(&mut self, record: TargetRecord) {
        if self.recent.len() == RECENT_OUTCOMES {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }
}
