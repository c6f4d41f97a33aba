//! Target worker: drives one target from queued to a terminal outcome.
//!
//! The worker owns the retry loop. Each attempt runs under the per-target
//! deadline and a process-wide connection permit; between attempts the
//! worker backs off exponentially with jitter. Cancellation is observable
//! at every suspension point: before an attempt, during it, and during
//! the backoff sleep.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use schemacast_core::backoff::retry_delay;
use schemacast_core::outcome::{ErrorKind, Outcome};
use schemacast_core::policy::PropagationPolicy;
use schemacast_core::version::ScriptVersion;
use schemacast_db::target::Target;

use crate::executor::{AttemptSuccess, TargetExecutor};

/// Non-terminal notification from a worker to the dispatcher.
#[derive(Debug)]
pub enum WorkerSignal {
    /// The worker is backing off before another attempt.
    Retrying {
        database: String,
        attempt: u32,
        delay: Duration,
    },
    /// The worker finished; exactly one per target.
    Done { database: String, outcome: Outcome },
}

/// Everything a worker shares with its siblings. One per job.
pub struct WorkerContext {
    pub job_id: String,
    pub script: Arc<ScriptVersion>,
    pub policy: Arc<PropagationPolicy>,
    pub executor: Arc<dyn TargetExecutor>,
    /// Process-wide connection ceiling, shared across jobs.
    pub connection_permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub signals: mpsc::Sender<WorkerSignal>,
}

/// Drive one target to its terminal outcome.
///
/// Never returns an error: every exit path is an [`Outcome`].
pub async fn run_target(ctx: &WorkerContext, target: &Target) -> Outcome {
    let mut attempts = 0u32;

    loop {
        if ctx.cancel.is_cancelled() {
            return cancelled_outcome(attempts);
        }

        attempts += 1;
        let attempt_started = Instant::now();

        let attempt = async {
            let _permit = ctx
                .connection_permits
                .acquire()
                .await
                .expect("connection semaphore closed");
            tokio::time::timeout(
                ctx.policy.per_target_timeout,
                ctx.executor.execute(
                    target,
                    &ctx.script,
                    ctx.policy.dry_run,
                    ctx.policy.on_checksum_mismatch,
                ),
            )
            .await
        };

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return cancelled_outcome(attempts),
            result = attempt => result,
        };

        let (kind, message) = match result {
            Ok(Ok(AttemptSuccess::Applied)) => {
                return Outcome::Succeeded {
                    duration: attempt_started.elapsed(),
                };
            }
            Ok(Ok(AttemptSuccess::Skipped(reason))) => {
                return Outcome::Skipped { reason };
            }
            Ok(Err(exec_err)) => (exec_err.kind, exec_err.message),
            Err(_elapsed) => (
                ErrorKind::Timeout,
                format!(
                    "attempt exceeded the per-target deadline of {:?}",
                    ctx.policy.per_target_timeout
                ),
            ),
        };

        if !kind.is_retryable() || attempts > ctx.policy.max_retries {
            tracing::debug!(
                job_id = %ctx.job_id,
                database = %target.database,
                ?kind,
                attempts,
                error = %message,
                "Target failed",
            );
            return Outcome::Failed {
                kind,
                error: message,
                attempts,
            };
        }

        let delay = retry_delay(
            attempts - 1,
            ctx.policy.base_backoff,
            ctx.policy.max_backoff,
            kind.is_resource_exhaustion(),
        );
        let _ = ctx
            .signals
            .send(WorkerSignal::Retrying {
                database: target.database.clone(),
                attempt: attempts,
                delay,
            })
            .await;

        tokio::select! {
            _ = ctx.cancel.cancelled() => return cancelled_outcome(attempts),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn cancelled_outcome(attempts: u32) -> Outcome {
    Outcome::Failed {
        kind: ErrorKind::Cancelled,
        error: "job cancelled".to_string(),
        attempts,
    }
}
