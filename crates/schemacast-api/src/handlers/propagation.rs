//! Handlers for the propagation resource: submit, snapshot, live stream,
//! stop, and engine metrics.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use schemacast_core::policy::ChecksumPolicy;
use schemacast_engine::job::Job;
use schemacast_engine::progress::{ProgressEvent, ProgressEventKind};
use schemacast_engine::{CancelOutcome, EngineError, SubmitRequest};

use crate::error::{AppError, AppResult};
use crate::handlers::versions::DEFAULT_PATTERN;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// Body of `POST /schema/propagate`. Knobs left unset fall back to the
/// engine's configured defaults.
#[derive(Debug, Deserialize)]
pub struct PropagateRequest {
    pub version_id: String,
    pub pattern: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub max_concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub per_target_timeout_secs: Option<u64>,
    pub error_threshold_fraction: Option<f64>,
    pub min_sample: Option<usize>,
    pub on_checksum_mismatch: Option<ChecksumPolicy>,
}

#[derive(Debug, Serialize)]
pub struct PropagateAccepted {
    pub job_id: String,
    pub total_targets: usize,
}

/// POST /api/v1/schema/propagate
///
/// Validate and launch a propagation job. Returns 202 immediately; the
/// job runs in the background.
pub async fn start_propagation(
    State(state): State<AppState>,
    Json(request): Json<PropagateRequest>,
) -> AppResult<impl IntoResponse> {
    let mut policy = state.engine.default_policy();
    policy.dry_run = request.dry_run;
    if let Some(v) = request.max_concurrency {
        policy.max_concurrency = v;
    }
    if let Some(v) = request.max_retries {
        policy.max_retries = v;
    }
    if let Some(v) = request.per_target_timeout_secs {
        policy.per_target_timeout = Duration::from_secs(v);
    }
    if let Some(v) = request.error_threshold_fraction {
        policy.error_threshold_fraction = v;
    }
    if let Some(v) = request.min_sample {
        policy.min_sample = v;
    }
    if let Some(v) = request.on_checksum_mismatch {
        policy.on_checksum_mismatch = v;
    }

    let receipt = state
        .engine
        .submit_job(SubmitRequest {
            version_id: request.version_id,
            pattern: request
                .pattern
                .unwrap_or_else(|| DEFAULT_PATTERN.to_string()),
            policy,
        })
        .await?;

    tracing::info!(
        job_id = %receipt.job_id,
        total_targets = receipt.total_targets,
        "Propagation job accepted",
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: PropagateAccepted {
                job_id: receipt.job_id,
                total_targets: receipt.total_targets,
            },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Job snapshot enriched with the derived throughput and ETA the
/// dashboard renders.
#[derive(Debug, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    /// Completions per second, e.g. `"12.3 db/s"`.
    pub rate: String,
    pub eta_seconds: u64,
}

/// GET /api/v1/schema/propagate/{job_id}
pub async fn job_snapshot(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DataResponse<JobSnapshot>>> {
    let job = state
        .engine
        .job_snapshot(&job_id)
        .await
        .ok_or(EngineError::JobNotFound(job_id))?;

    let end = job.finished_at.unwrap_or_else(Utc::now);
    let elapsed = (end - job.started_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
        .as_secs_f64();
    let completed = job.counts.completed();
    let rate = if elapsed > 0.0 {
        completed as f64 / elapsed
    } else {
        0.0
    };
    let remaining = job.counts.total.saturating_sub(completed);
    let eta_seconds = if rate > 0.0 {
        (remaining as f64 / rate) as u64
    } else {
        0
    };

    Ok(Json(DataResponse {
        data: JobSnapshot {
            job,
            rate: format!("{rate:.1} db/s"),
            eta_seconds,
        },
    }))
}

/// GET /api/v1/schema/propagate
///
/// Every retained job, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<Job>>>> {
    Ok(Json(DataResponse {
        data: state.engine.list_jobs().await,
    }))
}

// ---------------------------------------------------------------------------
// Live stream
// ---------------------------------------------------------------------------

/// GET /api/v1/schema/propagate/{job_id}/stream
///
/// Server-sent events: the job's progress feed, starting with a snapshot
/// of the current counts and ending with the terminal notice. Slow
/// consumers receive a `dropped` notice instead of stalling the engine.
pub async fn stream_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Subscribe before snapshotting so no event between the two is lost.
    let subscriber = state.engine.subscribe(&job_id);
    let job = state
        .engine
        .job_snapshot(&job_id)
        .await
        .ok_or(EngineError::JobNotFound(job_id.clone()))?;

    let initial = if job.status.is_terminal() {
        ProgressEvent::job(
            job_id,
            ProgressEventKind::JobFinished {
                status: job.status,
                counts: job.counts,
            },
        )
    } else {
        ProgressEvent::job(
            job_id,
            ProgressEventKind::ProgressSnapshot {
                status: job.status,
                counts: job.counts,
            },
        )
    };
    let already_done = initial.is_job_terminal();

    let head = stream::iter(vec![Ok::<Event, Infallible>(to_sse_event(&initial))]);
    let tail = stream::unfold(
        (subscriber, already_done),
        |(mut subscriber, done)| async move {
            if done {
                return None;
            }
            let event = subscriber.next_event().await?;
            let done = event.is_job_terminal();
            Some((Ok(to_sse_event(&event)), (subscriber, done)))
        },
    );

    Ok(Sse::new(head.chain(tail)).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &ProgressEvent) -> Event {
    Event::default()
        .json_data(event)
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to serialize progress event");
            Event::default().data("{}")
        })
}

// ---------------------------------------------------------------------------
// Stop
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub status: &'static str,
}

/// POST /api/v1/schema/propagate/{job_id}/stop
///
/// Deliver the cooperative stop signal. Stopping an already-finished job
/// is not an error; the response says which case applied.
pub async fn stop_propagation(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<Json<DataResponse<StopResponse>>> {
    let status = match state.engine.cancel_job(&job_id).await {
        CancelOutcome::Accepted => "accepted",
        CancelOutcome::AlreadyTerminal => "already_terminal",
        CancelOutcome::NotFound => {
            return Err(AppError::Engine(EngineError::JobNotFound(job_id)));
        }
    };
    Ok(Json(DataResponse {
        data: StopResponse { status },
    }))
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// GET /api/v1/schema/metrics
pub async fn metrics(
    State(state): State<AppState>,
) -> Json<DataResponse<schemacast_engine::metrics::MetricsSnapshot>> {
    Json(DataResponse {
        data: state.engine.metrics_snapshot(),
    })
}
