//! The per-job scheduler.
//!
//! Fans the target list out to workers with bounded concurrency, records
//! every outcome into the job store and onto the progress bus, enforces
//! the error-threshold circuit breaker, honors cancellation, and writes
//! the job's single terminal state.
//!
//! Start order follows the target list so partial runs are reproducible;
//! completion order is whatever the cluster gives back.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use schemacast_core::breaker::should_trip;
use schemacast_core::outcome::Outcome;
use schemacast_core::policy::PropagationPolicy;
use schemacast_core::version::ScriptVersion;
use schemacast_db::target::Target;

use crate::executor::TargetExecutor;
use crate::job::JobStatus;
use crate::metrics::Metrics;
use crate::progress::{ProgressBus, ProgressEvent, ProgressEventKind};
use crate::store::JobStore;
use crate::worker::{run_target, WorkerContext, WorkerSignal};

/// How often running jobs publish a counts snapshot to subscribers.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Buffer between workers and the aggregation loop.
const SIGNAL_BUFFER: usize = 64;

/// Executes one job against its resolved target list.
pub struct Dispatcher {
    store: Arc<JobStore>,
    bus: Arc<ProgressBus>,
    executor: Arc<dyn TargetExecutor>,
    connection_permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<JobStore>,
        bus: Arc<ProgressBus>,
        executor: Arc<dyn TargetExecutor>,
        connection_permits: Arc<Semaphore>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            bus,
            executor,
            connection_permits,
            metrics,
        }
    }

    /// Run the job to its terminal state. The job must already exist in
    /// the store (status pending).
    pub async fn run(
        &self,
        job_id: String,
        script: ScriptVersion,
        targets: Vec<Target>,
        policy: PropagationPolicy,
        cancel: CancellationToken,
    ) -> JobStatus {
        let total = targets.len();
        self.store.mark_running(&job_id).await;
        self.metrics.job_started();
        tracing::info!(
            %job_id,
            version_id = %script.version_id,
            total,
            max_concurrency = policy.max_concurrency,
            dry_run = policy.dry_run,
            "Propagation started",
        );

        let heartbeat = self.spawn_heartbeat(job_id.clone());

        let (signal_tx, mut signal_rx) = mpsc::channel::<WorkerSignal>(SIGNAL_BUFFER);
        let ctx = Arc::new(WorkerContext {
            job_id: job_id.clone(),
            script: Arc::new(script),
            policy: Arc::new(policy.clone()),
            executor: Arc::clone(&self.executor),
            connection_permits: Arc::clone(&self.connection_permits),
            cancel: cancel.clone(),
            signals: signal_tx,
        });

        let mut queue = targets.into_iter();
        let mut in_flight = 0usize;
        let mut stopping = false;
        let mut cancelled = false;
        let mut breaker_tripped = false;
        let mut final_counts = self
            .store
            .snapshot(&job_id)
            .await
            .map(|job| job.counts)
            .unwrap_or_default();

        loop {
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
                stopping = true;
                self.store.mark_stopping(&job_id).await;
                tracing::info!(%job_id, "Cancellation requested; draining in-flight workers");
            }

            while !stopping && in_flight < policy.max_concurrency {
                let Some(target) = queue.next() else { break };
                self.start_worker(&job_id, Arc::clone(&ctx), target).await;
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled(), if !cancelled => {
                    // Handled at the top of the loop.
                    continue;
                }
                Some(signal) = signal_rx.recv() => match signal {
                    WorkerSignal::Retrying { database, attempt, delay } => {
                        self.store.record_retrying(&job_id, &database).await;
                        self.metrics.retry();
                        self.bus.publish(ProgressEvent::target(
                            job_id.as_str(),
                            database.as_str(),
                            ProgressEventKind::Retrying {
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                            },
                        ));
                    }
                    WorkerSignal::Done { database, outcome } => {
                        in_flight -= 1;
                        if let Some(counts) =
                            self.store.record_outcome(&job_id, &database, &outcome).await
                        {
                            final_counts = counts;
                        }
                        self.publish_terminal(&job_id, &database, &outcome);

                        if !stopping
                            && should_trip(
                                final_counts.failed,
                                final_counts.completed(),
                                policy.min_sample,
                                policy.error_threshold_fraction,
                            )
                        {
                            breaker_tripped = true;
                            stopping = true;
                            self.store.mark_stopping(&job_id).await;
                            tracing::warn!(
                                %job_id,
                                failed = final_counts.failed,
                                completed = final_counts.completed(),
                                threshold = policy.error_threshold_fraction,
                                "Error threshold exceeded; aborting job",
                            );
                        }
                    }
                },
            }
        }

        let status = if cancelled {
            JobStatus::Cancelled
        } else if breaker_tripped {
            JobStatus::Aborted
        } else if final_counts.failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };

        self.store.finalize(&job_id, status).await;
        self.metrics.job_finished();
        heartbeat.abort();

        let counts = self
            .store
            .snapshot(&job_id)
            .await
            .map(|job| job.counts)
            .unwrap_or(final_counts);
        self.bus.publish(ProgressEvent::job(
            job_id.as_str(),
            ProgressEventKind::JobFinished { status, counts },
        ));
        tracing::info!(
            %job_id,
            ?status,
            started = counts.started,
            succeeded = counts.succeeded,
            skipped = counts.skipped,
            failed = counts.failed,
            "Propagation finished",
        );

        status
    }

    /// Hand the next target to a worker, in list order.
    async fn start_worker(&self, job_id: &str, ctx: Arc<WorkerContext>, target: Target) {
        self.store.record_started(job_id).await;
        self.metrics.target_started();
        self.bus.publish(ProgressEvent::target(
            job_id,
            target.database.as_str(),
            ProgressEventKind::Started,
        ));

        tokio::spawn(async move {
            let outcome = run_target(&ctx, &target).await;
            // The dispatcher holds the receiver for the whole run; a send
            // failure means the process is tearing down.
            let _ = ctx
                .signals
                .send(WorkerSignal::Done {
                    database: target.database,
                    outcome,
                })
                .await;
        });
    }

    fn publish_terminal(&self, job_id: &str, database: &str, outcome: &Outcome) {
        let kind = match outcome {
            Outcome::Succeeded { duration } => {
                self.metrics.target_succeeded();
                ProgressEventKind::Succeeded {
                    duration_ms: duration.as_millis() as u64,
                }
            }
            Outcome::Skipped { reason } => {
                self.metrics.target_skipped();
                ProgressEventKind::Skipped { reason: *reason }
            }
            Outcome::Failed {
                kind,
                error,
                attempts,
            } => {
                self.metrics.target_failed();
                ProgressEventKind::Failed {
                    error_kind: *kind,
                    error: error.clone(),
                    attempts: *attempts,
                }
            }
        };
        self.bus
            .publish(ProgressEvent::target(job_id, database, kind));
    }

    /// Publish a counts snapshot every two seconds until aborted.
    fn spawn_heartbeat(&self, job_id: String) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            // The immediate first tick would just repeat the zero counts.
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(job) = store.snapshot(&job_id).await else {
                    break;
                };
                bus.publish(ProgressEvent::job(
                    job_id.as_str(),
                    ProgressEventKind::ProgressSnapshot {
                        status: job.status,
                        counts: job.counts,
                    },
                ));
            }
        })
    }
}
