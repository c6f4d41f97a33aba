//! Terminal outcomes for one target and the error taxonomy behind them.
//!
//! A target worker never propagates driver errors upward: every exit path
//! is reified into an [`Outcome`]. The dispatcher only ever aggregates
//! these values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a target was skipped instead of executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The ledger already holds this version with an identical checksum.
    SameChecksum,
    /// The ledger holds this version with a different checksum and the
    /// policy says skip.
    ChecksumMismatch,
    /// Dry run against a target that already applied this version.
    DryRunAlreadyApplied,
    /// Dry run executed the script and rolled it back.
    DryRunExecuted,
}

/// Classified failure kinds. Kinds, not concrete error types: the driver
/// message travels separately as display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Cannot establish or authenticate the session.
    Connect,
    /// Serialization, deadlock, lock-timeout, admin shutdown.
    ExecuteTransient,
    /// Syntax, permission, integrity, undefined object.
    ExecutePermanent,
    /// Pooler or server rejected due to capacity.
    ResourceExhausted,
    /// Ledger holds a different checksum and the policy says fail.
    ChecksumMismatch,
    /// The per-target attempt deadline elapsed.
    Timeout,
    /// Cooperative cancellation.
    Cancelled,
    /// A bug; reported as failure, never retried.
    Internal,
}

impl ErrorKind {
    /// Whether another attempt may be made for this kind.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Connect
                | ErrorKind::ExecuteTransient
                | ErrorKind::ResourceExhausted
                | ErrorKind::Timeout
        )
    }

    /// Whether retries for this kind should back off longer than usual.
    pub fn is_resource_exhaustion(self) -> bool {
        self == ErrorKind::ResourceExhausted
    }
}

/// Terminal result of driving one target through one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    /// Script executed and committed; ledger stamped.
    Succeeded { duration: Duration },
    /// Nothing was committed; see the reason.
    Skipped { reason: SkipReason },
    /// All retries exhausted or a non-retryable error was encountered.
    Failed {
        kind: ErrorKind,
        /// Short human-readable driver message.
        error: String,
        /// Total attempts made, including the first.
        attempts: u32,
    },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}
