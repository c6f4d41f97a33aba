//! One attempt against one target.
//!
//! [`TargetExecutor`] is the seam between the retry machinery and the
//! database driver: the worker owns attempts, timeouts, and backoff; the
//! executor owns a single connect → transact → stamp round trip. Tests
//! drive the dispatcher with a scripted executor instead of a cluster.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};

use schemacast_core::classify::classify_sqlstate;
use schemacast_core::outcome::{ErrorKind, SkipReason};
use schemacast_core::policy::ChecksumPolicy;
use schemacast_core::version::ScriptVersion;
use schemacast_db::ledger::{self, Applied};
use schemacast_db::target::Target;

/// Longest driver message carried in outcomes and progress events; the
/// full error stays in the logs.
const MAX_ERROR_LEN: usize = 200;

/// How one attempt ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptSuccess {
    /// Script committed and ledger stamped.
    Applied,
    /// Nothing committed; see the reason.
    Skipped(SkipReason),
}

/// A classified attempt failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ExecuteError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ExecuteError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > MAX_ERROR_LEN {
            message.truncate(MAX_ERROR_LEN);
            message.push('…');
        }
        Self { kind, message }
    }
}

/// Drives one attempt of one script against one target.
#[async_trait]
pub trait TargetExecutor: Send + Sync + 'static {
    async fn execute(
        &self,
        target: &Target,
        script: &ScriptVersion,
        dry_run: bool,
        on_mismatch: ChecksumPolicy,
    ) -> Result<AttemptSuccess, ExecuteError>;
}

/// The production executor: a direct PostgreSQL connection per attempt.
pub struct PgTargetExecutor;

impl TargetExecutor for PgTargetExecutor {
    fn execute<'life0, 'life1, 'life2, 'async_trait>(
        &'life0 self,
        target: &'life1 Target,
        script: &'life2 ScriptVersion,
        dry_run: bool,
        on_mismatch: ChecksumPolicy,
    ) -> ::core::pin::Pin<
        Box<
            dyn ::core::future::Future<Output = Result<AttemptSuccess, ExecuteError>>
                + ::core::marker::Send
                + 'async_trait,
        >,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        'life2: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let mut conn = PgConnection::connect_with(&target.connect_options())
                .await
                .map_err(|e| classify(&e, Phase::Connect))?;

            let result = run_attempt(&mut conn, script, dry_run, on_mismatch).await;

            // Release the session on every exit path; a failed close is not
            // worth surfacing over the attempt's own result.
            let _ = conn.close().await;
            result
        })
    }
}

enum Phase {
    Connect,
    Execute,
}

/// The transactional body of one attempt. The ledger is created and
/// stamped inside the same transaction as the script, so either both
/// commit or neither does. The stamp is the last statement before commit.
async fn run_attempt(
    conn: &mut PgConnection,
    script: &ScriptVersion,
    dry_run: bool,
    on_mismatch: ChecksumPolicy,
) -> Result<AttemptSuccess, ExecuteError> {
    let exec_err = |e: sqlx::Error| classify(&e, Phase::Execute);

    let mut tx = conn.begin().await.map_err(exec_err)?;

    ledger::ensure(&mut *tx).await.map_err(exec_err)?;

    let mut reapplying = false;
    match ledger::lookup(&mut *tx, &script.version_id)
        .await
        .map_err(exec_err)?
    {
        Applied::Present(prev) => {
            if dry_run {
                tx.rollback().await.map_err(exec_err)?;
                return Ok(AttemptSuccess::Skipped(SkipReason::DryRunAlreadyApplied));
            }
            // A row without a checksum predates fingerprint tracking;
            // the version id alone makes it already-applied.
            let same = prev.as_deref().map_or(true, |p| p == script.checksum);
            if same {
                tx.rollback().await.map_err(exec_err)?;
                return Ok(AttemptSuccess::Skipped(SkipReason::SameChecksum));
            }
            match on_mismatch {
                ChecksumPolicy::Skip => {
                    tx.rollback().await.map_err(exec_err)?;
                    return Ok(AttemptSuccess::Skipped(SkipReason::ChecksumMismatch));
                }
                ChecksumPolicy::Fail => {
                    tx.rollback().await.map_err(exec_err)?;
                    return Err(ExecuteError::new(
                        ErrorKind::ChecksumMismatch,
                        format!(
                            "version {} recorded with checksum {}, script is {}",
                            script.version_id,
                            prev.as_deref().unwrap_or("<none>"),
                            script.checksum
                        ),
                    ));
                }
                ChecksumPolicy::Reapply => reapplying = true,
            }
        }
        Applied::Absent => {}
    }

    sqlx::raw_sql(sqlx::AssertSqlSafe(script.sql.as_str()))
        .execute(&mut *tx)
        .await
        .map_err(exec_err)?;

    if dry_run {
        tx.rollback().await.map_err(exec_err)?;
        return Ok(AttemptSuccess::Skipped(SkipReason::DryRunExecuted));
    }

    if reapplying {
        ledger::restamp(&mut *tx, &script.version_id, &script.checksum)
            .await
            .map_err(exec_err)?;
    } else {
        ledger::stamp(&mut *tx, &script.version_id, &script.checksum)
            .await
            .map_err(exec_err)?;
    }

    tx.commit().await.map_err(exec_err)?;
    Ok(AttemptSuccess::Applied)
}

/// Map a driver error to a failure kind plus a truncated message.
fn classify(err: &sqlx::Error, phase: Phase) -> ExecuteError {
    let kind = match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => classify_sqlstate(&code),
            None => ErrorKind::Internal,
        },
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_) => match phase {
            Phase::Connect => ErrorKind::Connect,
            // A session that dies mid-statement is indistinguishable from
            // a server restart; retry it.
            Phase::Execute => ErrorKind::ExecuteTransient,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => ErrorKind::ResourceExhausted,
        _ => ErrorKind::Internal,
    };
    ExecuteError::new(kind, err.to_string())
}
