//! The engine facade: the in-process interface the gateway consumes.
//!
//! `submit_job` is non-blocking — validation and target resolution happen
//! inline, then the dispatcher runs as a background task bound to the
//! job. Everything else is a read (`job_snapshot`, `subscribe`,
//! `list_*`) or the cancel signal.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;

use schemacast_core::policy::PropagationPolicy;
use schemacast_core::version::{ScriptVersion, VersionMeta};
use schemacast_db::{catalog, simulator, DbPool};

use crate::artifact::{VersionArtifact, VersionStore};
use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::executor::{PgTargetExecutor, TargetExecutor};
use crate::job::Job;
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::progress::{ProgressBus, ProgressSubscriber};
use crate::store::JobStore;

/// Job id prefix plus the number of hex characters following it.
const JOB_ID_PREFIX: &str = "prop_";
const JOB_ID_HEX_LEN: usize = 12;

/// A propagation request from the gateway.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub version_id: String,
    /// Glob-like tenant pattern, e.g. `cmp_%` or `cmp_*`.
    pub pattern: String,
    pub policy: PropagationPolicy,
}

/// What the gateway gets back from a submission.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub job_id: String,
    pub total_targets: usize,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The stop signal was delivered to a live job.
    Accepted,
    /// The job had already reached a terminal state.
    AlreadyTerminal,
    /// No such job.
    NotFound,
}

/// The propagation engine. Shared via `Arc` across the gateway.
pub struct Engine {
    pool: DbPool,
    config: EngineConfig,
    versions: VersionStore,
    store: Arc<JobStore>,
    bus: Arc<ProgressBus>,
    executor: Arc<dyn TargetExecutor>,
    connection_permits: Arc<Semaphore>,
    metrics: Arc<Metrics>,
    cancellations: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl Engine {
    /// Production engine with the real per-target executor.
    pub fn new(pool: DbPool, config: EngineConfig) -> Self {
        Self::with_executor(pool, config, Arc::new(PgTargetExecutor))
    }

    /// Engine with a caller-supplied executor (embeddings, tests).
    pub fn with_executor(
        pool: DbPool,
        config: EngineConfig,
        executor: Arc<dyn TargetExecutor>,
    ) -> Self {
        let versions = VersionStore::new(config.sql_versions_dir.clone());
        let connection_permits = Arc::new(Semaphore::new(config.max_concurrent_connections));
        Self {
            pool,
            config,
            versions,
            store: Arc::new(JobStore::new()),
            bus: Arc::new(ProgressBus::default()),
            executor,
            connection_permits,
            metrics: Arc::new(Metrics::default()),
            cancellations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate a request, resolve its targets, and launch the dispatcher
    /// in the background. Returns as soon as the job is registered.
    pub async fn submit_job(&self, request: SubmitRequest) -> Result<SubmitReceipt, EngineError> {
        request.policy.validate()?;
        let script = self.versions.load_script(&request.version_id)?;
        self.submit_script(script, &request.pattern, request.policy)
            .await
    }

    /// Launch a pre-validated script against every tenant matching the
    /// pattern. This is the raw engine entry point; a supplied downgrade
    /// script runs through here exactly like an upgrade.
    pub async fn submit_script(
        &self,
        script: ScriptVersion,
        pattern: &str,
        policy: PropagationPolicy,
    ) -> Result<SubmitReceipt, EngineError> {
        policy.validate()?;

        let settings = self.config.connect_settings();
        let targets = catalog::resolve_targets(&self.pool, pattern, &settings).await?;
        if targets.is_empty() {
            return Err(EngineError::NoTargets(pattern.to_string()));
        }

        let job_id = new_job_id();
        let names: Vec<String> = targets.iter().map(|t| t.database.clone()).collect();
        let job = Job::new(
            job_id.clone(),
            script.version_id.clone(),
            policy.clone(),
            Arc::new(names),
        );
        let total_targets = targets.len();
        self.store.create(job).await;

        let cancel = CancellationToken::new();
        self.cancellations
            .write()
            .await
            .insert(job_id.clone(), cancel.clone());

        let dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.bus),
            Arc::clone(&self.executor),
            Arc::clone(&self.connection_permits),
            Arc::clone(&self.metrics),
        );
        let cancellations = Arc::clone(&self.cancellations);
        let task_job_id = job_id.clone();
        tokio::spawn(async move {
            dispatcher
                .run(task_job_id.clone(), script, targets, policy, cancel)
                .await;
            cancellations.write().await.remove(&task_job_id);
        });

        Ok(SubmitReceipt {
            job_id,
            total_targets,
        })
    }

    /// Consistent point-in-time snapshot of one job.
    pub async fn job_snapshot(&self, job_id: &str) -> Option<Job> {
        self.store.snapshot(job_id).await
    }

    /// Snapshot of every retained job, newest first.
    pub async fn list_jobs(&self) -> Vec<Job> {
        self.store.list().await
    }

    /// Live event stream for one job.
    pub fn subscribe(&self, job_id: &str) -> ProgressSubscriber {
        self.bus.subscribe_job(job_id)
    }

    /// Deliver the stop signal to a running job.
    pub async fn cancel_job(&self, job_id: &str) -> CancelOutcome {
        if let Some(token) = self.cancellations.read().await.get(job_id) {
            token.cancel();
            return CancelOutcome::Accepted;
        }
        match self.store.snapshot(job_id).await {
            Some(job) if job.status.is_terminal() => CancelOutcome::AlreadyTerminal,
            // Registered but its token is already gone: the dispatcher is
            // finalizing right now, which is as terminal as it gets.
            Some(_) => CancelOutcome::AlreadyTerminal,
            None => CancelOutcome::NotFound,
        }
    }

    /// Tenant databases matching a pattern; queried fresh, never cached.
    pub async fn list_targets(&self, pattern: &str) -> Result<Vec<String>, EngineError> {
        Ok(catalog::list_databases(&self.pool, pattern).await?)
    }

    /// Metadata of every generated version, newest first.
    pub fn list_versions(&self) -> Result<Vec<VersionMeta>, EngineError> {
        self.versions.list()
    }

    /// One version directory in full (metadata + scripts).
    pub fn version_detail(&self, version_id: &str) -> Result<VersionArtifact, EngineError> {
        self.versions.get(version_id)
    }

    /// Point-in-time engine counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The configured baseline policy; submissions override individual
    /// knobs on top of this.
    pub fn default_policy(&self) -> PropagationPolicy {
        self.config.default_policy.clone()
    }

    /// Create fixture tenant databases for load testing.
    pub async fn create_fixtures(
        &self,
        count: usize,
        prefix: &str,
        start_id: usize,
        template: Option<&str>,
    ) -> Result<Vec<String>, EngineError> {
        Ok(simulator::create_test_databases(&self.pool, count, prefix, start_id, template).await?)
    }

    /// Drop every fixture database matching `prefix*`. Returns how many
    /// were removed.
    pub async fn cleanup_fixtures(&self, prefix: &str) -> Result<usize, EngineError> {
        let pattern = format!("{prefix}*");
        let names = catalog::list_databases(&self.pool, &pattern).await?;
        Ok(simulator::cleanup_test_databases(&self.pool, &names).await?)
    }
}

/// Generate a job id: `prop_` plus 12 hex characters.
fn new_job_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{JOB_ID_PREFIX}{}", &hex[..JOB_ID_HEX_LEN])
}
