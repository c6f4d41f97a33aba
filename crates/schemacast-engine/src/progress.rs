//! Progress bus: fan-out of per-target events to live subscribers.
//!
//! Backed by a `tokio::sync::broadcast` channel. Delivery toward
//! subscribers is best-effort: a subscriber that falls behind loses the
//! oldest events and receives a single `dropped` notice with the count,
//! so it knows its view is incomplete. The job store is not fed from
//! here — the dispatcher updates it directly, which is what makes that
//! path lossless and in-order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use schemacast_core::outcome::{ErrorKind, SkipReason};

use crate::job::{JobCounts, JobStatus};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// What happened, with the payload specific to each kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressEventKind {
    /// A worker began driving a target.
    Started,
    /// A target attempt failed and the worker is backing off.
    Retrying { attempt: u32, delay_ms: u64 },
    /// Script executed and committed on the target.
    Succeeded { duration_ms: u64 },
    /// Target left untouched; see the reason.
    Skipped { reason: SkipReason },
    /// Target exhausted its retries or hit a permanent error.
    Failed {
        error_kind: ErrorKind,
        error: String,
        attempts: u32,
    },
    /// Periodic heartbeat with current counts while the job runs.
    ProgressSnapshot {
        status: JobStatus,
        counts: JobCounts,
    },
    /// The job reached its terminal state.
    JobFinished { status: JobStatus, counts: JobCounts },
    /// This subscriber fell behind and `missed` events were discarded.
    Dropped { missed: u64 },
}

/// One event on the progress bus.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Target database, absent for job-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    /// Event about one target of a job.
    pub fn target(
        job_id: impl Into<String>,
        database: impl Into<String>,
        kind: ProgressEventKind,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            database: Some(database.into()),
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Job-level event (heartbeat, terminal notice, drop notice).
    pub fn job(job_id: impl Into<String>, kind: ProgressEventKind) -> Self {
        Self {
            job_id: job_id.into(),
            database: None,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Whether this event ends a subscription for its job.
    pub fn is_job_terminal(&self) -> bool {
        matches!(self.kind, ProgressEventKind::JobFinished { .. })
    }
}

/// In-process fan-out bus for [`ProgressEvent`]s, shared via `Arc`.
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl ProgressBus {
    /// Create a bus with a specific per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// The producer never blocks: with zero subscribers the event is
    /// silently discarded, and a full subscriber buffer drops that
    /// subscriber's oldest events rather than stalling delivery.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to every event on the bus.
    pub fn subscribe_all(&self) -> ProgressSubscriber {
        ProgressSubscriber {
            rx: self.sender.subscribe(),
            job_filter: None,
        }
    }

    /// Subscribe to the events of a single job.
    pub fn subscribe_job(&self, job_id: impl Into<String>) -> ProgressSubscriber {
        ProgressSubscriber {
            rx: self.sender.subscribe(),
            job_filter: Some(job_id.into()),
        }
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A live subscription. Dropping it releases every resource it holds;
/// the producer never notices.
pub struct ProgressSubscriber {
    rx: broadcast::Receiver<ProgressEvent>,
    job_filter: Option<String>,
}

impl ProgressSubscriber {
    /// Receive the next matching event.
    ///
    /// Returns `None` once the bus is closed. If this subscriber lagged
    /// behind, a single [`ProgressEventKind::Dropped`] notice is returned
    /// in place of the discarded events.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Some(filter) = &self.job_filter {
                        if &event.job_id != filter {
                            continue;
                        }
                    }
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    let job_id = self.job_filter.clone().unwrap_or_default();
                    return Some(ProgressEvent::job(
                        job_id,
                        ProgressEventKind::Dropped { missed },
                    ));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
