//! End-to-end dispatcher scenarios against a scripted target executor.
//!
//! These exercise the whole propagation path — dispatcher, workers, job
//! store, progress bus — without a cluster: the executor is an in-memory
//! fake whose per-database behavior is scripted per attempt.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use schemacast_core::checksum::script_checksum;
use schemacast_core::outcome::{ErrorKind, SkipReason};
use schemacast_core::policy::{ChecksumPolicy, PropagationPolicy};
use schemacast_core::version::ScriptVersion;
use schemacast_db::target::{ConnectSettings, Target};
use schemacast_engine::dispatcher::Dispatcher;
use schemacast_engine::executor::{AttemptSuccess, ExecuteError, TargetExecutor};
use schemacast_engine::job::{Job, JobStatus};
use schemacast_engine::metrics::Metrics;
use schemacast_engine::progress::{ProgressBus, ProgressEventKind, ProgressSubscriber};
use schemacast_engine::store::JobStore;

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

/// One scripted attempt against one database.
#[derive(Debug, Clone)]
enum Step {
    /// Succeed immediately.
    Apply,
    /// Succeed after holding the slot for a while.
    SlowApply(Duration),
    /// Report an already-applied version.
    Skip(SkipReason),
    /// Fail with the given kind.
    Fail(ErrorKind),
}

/// Decrements the in-flight gauge even when the attempt future is dropped
/// mid-sleep (that is exactly what a timeout does).
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FakeExecutor {
    /// Remaining scripted steps per database; missing entries use `Apply`.
    plans: Mutex<HashMap<String, Vec<Step>>>,
    /// Fallback behavior when a database has no (remaining) plan.
    default_step: Mutex<Option<Step>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
    /// Databases in first-attempt order.
    starts: Mutex<Vec<String>>,
    /// Databases in completion order.
    finishes: Mutex<Vec<String>>,
    /// Dry-run flags observed across attempts.
    dry_runs: Mutex<Vec<bool>>,
}

impl FakeExecutor {
    fn new() -> Self {
        Self::default()
    }

    fn with_default(step: Step) -> Self {
        let exec = Self::default();
        *exec.default_step.lock().unwrap() = Some(step);
        exec
    }

    fn plan(&self, database: &str, steps: Vec<Step>) {
        self.plans
            .lock()
            .unwrap()
            .insert(database.to_string(), steps);
    }

    fn max_seen(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn start_order(&self) -> Vec<String> {
        self.starts.lock().unwrap().clone()
    }

    fn finish_order(&self) -> Vec<String> {
        self.finishes.lock().unwrap().clone()
    }

    fn next_step(&self, database: &str) -> Step {
        let mut plans = self.plans.lock().unwrap();
        if let Some(steps) = plans.get_mut(database) {
            if !steps.is_empty() {
                return steps.remove(0);
            }
        }
        drop(plans);
        self.default_step
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(Step::Apply)
    }
}

#[async_trait]
impl TargetExecutor for FakeExecutor {
    async fn execute(
        &self,
        target: &Target,
        _script: &ScriptVersion,
        dry_run: bool,
        _on_mismatch: ChecksumPolicy,
    ) -> Result<AttemptSuccess, ExecuteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(Arc::clone(&self.in_flight));

        {
            let mut starts = self.starts.lock().unwrap();
            if !starts.contains(&target.database) {
                starts.push(target.database.clone());
            }
        }
        self.dry_runs.lock().unwrap().push(dry_run);

        let result = match self.next_step(&target.database) {
            Step::Apply => Ok(AttemptSuccess::Applied),
            Step::SlowApply(delay) => {
                tokio::time::sleep(delay).await;
                Ok(AttemptSuccess::Applied)
            }
            Step::Skip(reason) => Ok(AttemptSuccess::Skipped(reason)),
            Step::Fail(kind) => Err(ExecuteError::new(kind, "injected failure")),
        };

        if result.is_ok() {
            self.finishes.lock().unwrap().push(target.database.clone());
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<JobStore>,
    bus: Arc<ProgressBus>,
    executor: Arc<FakeExecutor>,
    dispatcher: Dispatcher,
}

fn harness(executor: FakeExecutor) -> Harness {
    let store = Arc::new(JobStore::new());
    let bus = Arc::new(ProgressBus::default());
    let executor = Arc::new(executor);
    let dispatcher = Dispatcher::new(
        Arc::clone(&store),
        Arc::clone(&bus),
        Arc::clone(&executor) as Arc<dyn TargetExecutor>,
        Arc::new(tokio::sync::Semaphore::new(1000)),
        Arc::new(Metrics::default()),
    );
    Harness {
        store,
        bus,
        executor,
        dispatcher,
    }
}

fn script() -> ScriptVersion {
    let sql = "CREATE TABLE t (id int);";
    ScriptVersion::new("20260801_120000", sql, &script_checksum(sql)).unwrap()
}

/// Zero-padded names so list order and lexical order agree.
fn targets(n: usize) -> Vec<Target> {
    let settings = ConnectSettings {
        host: "localhost".to_string(),
        port: 5432,
        username: "postgres".to_string(),
        password: "postgres".to_string(),
    };
    (0..n)
        .map(|i| Target::new(&settings, format!("cmp_{i:03}")))
        .collect()
}

fn quick_policy() -> PropagationPolicy {
    PropagationPolicy {
        max_concurrency: 3,
        max_retries: 2,
        base_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(200),
        per_target_timeout: Duration::from_secs(5),
        error_threshold_fraction: 0.1,
        min_sample: 1000,
        dry_run: false,
        on_checksum_mismatch: ChecksumPolicy::Skip,
    }
}

async fn run_job(
    h: &Harness,
    job_id: &str,
    targets: Vec<Target>,
    policy: PropagationPolicy,
    cancel: CancellationToken,
) -> JobStatus {
    let names: Vec<String> = targets.iter().map(|t| t.database.clone()).collect();
    h.store
        .create(Job::new(
            job_id,
            "20260801_120000",
            policy.clone(),
            Arc::new(names),
        ))
        .await;
    h.dispatcher
        .run(job_id.to_string(), script(), targets, policy, cancel)
        .await
}

/// Drain a subscriber until the job's terminal notice, inclusive.
async fn drain_until_finished(sub: &mut ProgressSubscriber) -> Vec<ProgressEventKind> {
    let mut kinds = Vec::new();
    while let Some(event) = sub.next_event().await {
        let done = event.is_job_terminal();
        kinds.push(event.kind);
        if done {
            break;
        }
    }
    kinds
}

// ---------------------------------------------------------------------------
// Scenario: happy path with a concurrency bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_respects_concurrency_bound() {
    let executor = FakeExecutor::with_default(Step::SlowApply(Duration::from_millis(10)));
    let h = harness(executor);

    let status = run_job(
        &h,
        "prop_happy",
        targets(10),
        quick_policy(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Succeeded);
    let job = h.store.snapshot("prop_happy").await.unwrap();
    assert_eq!(job.counts.total, 10);
    assert_eq!(job.counts.started, 10);
    assert_eq!(job.counts.succeeded, 10);
    assert_eq!(job.counts.skipped, 0);
    assert_eq!(job.counts.failed, 0);
    assert!(
        h.executor.max_seen() <= 3,
        "saw {} concurrent attempts",
        h.executor.max_seen()
    );
}

// ---------------------------------------------------------------------------
// Scenario: idempotent replay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replay_skips_every_target() {
    let executor = FakeExecutor::with_default(Step::Skip(SkipReason::SameChecksum));
    let h = harness(executor);

    let status = run_job(
        &h,
        "prop_replay",
        targets(10),
        quick_policy(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Succeeded);
    let counts = h.store.snapshot("prop_replay").await.unwrap().counts;
    assert_eq!(counts.succeeded, 0);
    assert_eq!(counts.skipped, 10);
    assert_eq!(counts.failed, 0);
}

// ---------------------------------------------------------------------------
// Scenario: transient failures retried with growing backoff
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_retry_until_success() {
    let executor = FakeExecutor::new();
    executor.plan(
        "cmp_004",
        vec![
            Step::Fail(ErrorKind::Connect),
            Step::Fail(ErrorKind::Connect),
            Step::Fail(ErrorKind::Connect),
            Step::Apply,
        ],
    );
    let h = harness(executor);
    let mut sub = h.bus.subscribe_job("prop_retry");

    let policy = PropagationPolicy {
        max_retries: 3,
        base_backoff: Duration::from_millis(50),
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_retry",
        targets(8),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Succeeded);
    let counts = h.store.snapshot("prop_retry").await.unwrap().counts;
    assert_eq!(counts.succeeded, 8);
    assert_eq!(counts.failed, 0);

    let kinds = drain_until_finished(&mut sub).await;
    let delays: Vec<u64> = kinds
        .iter()
        .filter_map(|kind| match kind {
            ProgressEventKind::Retrying { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 3, "expected three retrying events");
    // 50ms, 100ms, 200ms, each within the ±20% jitter window (plus a
    // millisecond of truncation slack).
    assert!((39..=61).contains(&delays[0]), "first delay {}", delays[0]);
    assert!((79..=121).contains(&delays[1]), "second delay {}", delays[1]);
    assert!(
        (159..=241).contains(&delays[2]),
        "third delay {}",
        delays[2]
    );
}

// ---------------------------------------------------------------------------
// Scenario: permanent failures never retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn permanent_failures_fail_on_first_attempt() {
    let executor = FakeExecutor::with_default(Step::Fail(ErrorKind::ExecutePermanent));
    let h = harness(executor);
    let mut sub = h.bus.subscribe_job("prop_perm");

    let status = run_job(
        &h,
        "prop_perm",
        targets(4),
        quick_policy(),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Failed);
    let counts = h.store.snapshot("prop_perm").await.unwrap().counts;
    assert_eq!(counts.failed, 4);

    let kinds = drain_until_finished(&mut sub).await;
    let attempts: Vec<u32> = kinds
        .iter()
        .filter_map(|kind| match kind {
            ProgressEventKind::Failed { attempts, .. } => Some(*attempts),
            _ => None,
        })
        .collect();
    assert_eq!(attempts.len(), 4);
    assert!(attempts.iter().all(|&a| a == 1), "attempts: {attempts:?}");
}

// ---------------------------------------------------------------------------
// Scenario: circuit breaker aborts the job
// ---------------------------------------------------------------------------

#[tokio::test]
async fn circuit_breaker_aborts_and_stops_scheduling() {
    // The first forty targets hit a permanent error; the breaker must fire
    // long before the fleet is exhausted.
    let executor = FakeExecutor::new();
    for i in 0..40 {
        executor.plan(
            &format!("cmp_{i:03}"),
            vec![Step::Fail(ErrorKind::ExecutePermanent)],
        );
    }
    let h = harness(executor);

    let policy = PropagationPolicy {
        max_concurrency: 5,
        max_retries: 0,
        error_threshold_fraction: 0.1,
        min_sample: 20,
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_breaker",
        targets(100),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Aborted);
    let counts = h.store.snapshot("prop_breaker").await.unwrap().counts;
    assert!(counts.completed() >= 20, "breaker fired before min_sample");
    assert!(
        counts.started <= 30,
        "workers kept starting after the trip: started={}",
        counts.started
    );
    // Everything handed to a worker was drained.
    assert_eq!(counts.started, counts.completed());
}

// ---------------------------------------------------------------------------
// Scenario: cancellation mid-run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_drains_in_flight_and_omits_the_rest() {
    let executor = FakeExecutor::with_default(Step::SlowApply(Duration::from_millis(20)));
    let h = harness(executor);
    let cancel = CancellationToken::new();

    let names: Vec<String> = targets(50).iter().map(|t| t.database.clone()).collect();
    h.store
        .create(Job::new(
            "prop_cancel",
            "20260801_120000",
            quick_policy(),
            Arc::new(names),
        ))
        .await;

    let dispatcher_cancel = cancel.clone();
    let store = Arc::clone(&h.store);
    let run = {
        let policy = PropagationPolicy {
            max_concurrency: 4,
            ..quick_policy()
        };
        let targets = targets(50);
        let dispatcher = &h.dispatcher;
        async move {
            dispatcher
                .run(
                    "prop_cancel".to_string(),
                    script(),
                    targets,
                    policy,
                    dispatcher_cancel,
                )
                .await
        }
    };

    let watcher = tokio::spawn(async move {
        loop {
            if let Some(job) = store.snapshot("prop_cancel").await {
                if job.counts.completed() >= 5 {
                    cancel.cancel();
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    let status = run.await;
    watcher.await.unwrap();

    assert_eq!(status, JobStatus::Cancelled);
    let counts = h.store.snapshot("prop_cancel").await.unwrap().counts;
    assert!(counts.started < 50, "job was cancelled but ran to completion");
    // Unstarted targets are omitted; started ones all reached a terminal
    // outcome before finalization.
    assert_eq!(counts.started, counts.completed());
}

#[tokio::test]
async fn cancellation_before_start_reports_zero_started() {
    let executor = FakeExecutor::new();
    let h = harness(executor);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let status = run_job(&h, "prop_pre_cancel", targets(10), quick_policy(), cancel).await;

    assert_eq!(status, JobStatus::Cancelled);
    let counts = h.store.snapshot("prop_pre_cancel").await.unwrap().counts;
    assert_eq!(counts.started, 0);
    assert_eq!(counts.completed(), 0);
}

// ---------------------------------------------------------------------------
// Scenario: strict sequential execution at max_concurrency = 1
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_concurrency_is_strictly_ordered() {
    let executor = FakeExecutor::with_default(Step::SlowApply(Duration::from_millis(5)));
    let h = harness(executor);

    let policy = PropagationPolicy {
        max_concurrency: 1,
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_seq",
        targets(5),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Succeeded);
    assert_eq!(h.executor.max_seen(), 1);

    let expected: Vec<String> = (0..5).map(|i| format!("cmp_{i:03}")).collect();
    assert_eq!(h.executor.start_order(), expected);
    assert_eq!(h.executor.finish_order(), expected);
}

// ---------------------------------------------------------------------------
// Scenario: max_retries = 0 fails immediately on a transient error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_retries_fails_after_one_attempt() {
    let executor = FakeExecutor::new();
    executor.plan("cmp_000", vec![Step::Fail(ErrorKind::Connect)]);
    let h = harness(executor);
    let mut sub = h.bus.subscribe_job("prop_zero");

    let policy = PropagationPolicy {
        max_retries: 0,
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_zero",
        targets(1),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Failed);
    let kinds = drain_until_finished(&mut sub).await;
    assert!(kinds.iter().all(|kind| !matches!(kind, ProgressEventKind::Retrying { .. })));
    let failed = kinds.iter().find_map(|kind| match kind {
        ProgressEventKind::Failed {
            attempts,
            error_kind,
            ..
        } => Some((*attempts, *error_kind)),
        _ => None,
    });
    assert_eq!(failed, Some((1, ErrorKind::Connect)));
}

// ---------------------------------------------------------------------------
// Scenario: the per-target deadline bounds each attempt
// ---------------------------------------------------------------------------

#[tokio::test]
async fn slow_attempts_time_out_and_retry() {
    let executor = FakeExecutor::with_default(Step::SlowApply(Duration::from_millis(500)));
    let h = harness(executor);
    let mut sub = h.bus.subscribe_job("prop_timeout");

    let policy = PropagationPolicy {
        max_retries: 1,
        per_target_timeout: Duration::from_millis(50),
        base_backoff: Duration::from_millis(10),
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_timeout",
        targets(1),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Failed);
    let kinds = drain_until_finished(&mut sub).await;
    let failed = kinds.iter().find_map(|kind| match kind {
        ProgressEventKind::Failed {
            attempts,
            error_kind,
            ..
        } => Some((*attempts, *error_kind)),
        _ => None,
    });
    assert_eq!(failed, Some((2, ErrorKind::Timeout)));
}

// ---------------------------------------------------------------------------
// Event-stream ordering: started strictly precedes the terminal event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn each_target_gets_one_started_and_one_terminal_event() {
    let executor = FakeExecutor::new();
    let h = harness(executor);
    let mut sub = h.bus.subscribe_job("prop_events");

    let status = run_job(
        &h,
        "prop_events",
        targets(6),
        quick_policy(),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(status, JobStatus::Succeeded);

    let mut started: HashMap<String, usize> = HashMap::new();
    let mut terminal: HashMap<String, usize> = HashMap::new();
    while let Some(event) = sub.next_event().await {
        if event.is_job_terminal() {
            break;
        }
        let Some(database) = event.database.clone() else {
            continue;
        };
        match event.kind {
            ProgressEventKind::Started => {
                *started.entry(database).or_default() += 1;
            }
            ProgressEventKind::Succeeded { .. }
            | ProgressEventKind::Skipped { .. }
            | ProgressEventKind::Failed { .. } => {
                assert!(
                    started.contains_key(&database),
                    "terminal event for {database} before its started event"
                );
                *terminal.entry(database).or_default() += 1;
            }
            _ => {}
        }
    }

    assert_eq!(started.len(), 6);
    assert_eq!(terminal.len(), 6);
    assert!(started.values().all(|&n| n == 1));
    assert!(terminal.values().all(|&n| n == 1));
}

// ---------------------------------------------------------------------------
// Dry run flag reaches the executor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dry_run_flag_is_propagated() {
    let executor = FakeExecutor::with_default(Step::Skip(SkipReason::DryRunExecuted));
    let h = harness(executor);

    let policy = PropagationPolicy {
        dry_run: true,
        ..quick_policy()
    };
    let status = run_job(
        &h,
        "prop_dry",
        targets(3),
        policy,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(status, JobStatus::Succeeded);
    let counts = h.store.snapshot("prop_dry").await.unwrap().counts;
    assert_eq!(counts.skipped, 3);
    assert!(h.executor.dry_runs.lock().unwrap().iter().all(|&d| d));
}
