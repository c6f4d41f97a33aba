//! Propagation policy: every tunable the engine recognizes.
//!
//! Defaults mirror the production deployment (100 concurrent connections,
//! 3 retries, 10% error threshold). A policy is validated once at job
//! submission; the dispatcher and workers treat it as immutable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default upper bound on in-flight target workers per job.
pub const DEFAULT_MAX_CONCURRENCY: usize = 100;

/// Default retry attempts per target after the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay floor.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default retry delay cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default deadline for one full attempt (connect + execute + stamp).
pub const DEFAULT_PER_TARGET_TIMEOUT: Duration = Duration::from_secs(60);

/// Default failure fraction above which a job is aborted.
pub const DEFAULT_ERROR_THRESHOLD: f64 = 0.10;

/// Default minimum completed targets before the threshold is evaluated.
pub const DEFAULT_MIN_SAMPLE: usize = 10;

/// What to do when the ledger already holds this version with a different
/// checksum than the script being propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumPolicy {
    /// Leave the target untouched and report it as skipped (the default).
    #[default]
    Skip,
    /// Report the target as failed without executing the script.
    Fail,
    /// Execute the script again and overwrite the recorded checksum.
    Reapply,
}

/// All tunables recognized by the propagation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagationPolicy {
    /// Upper bound on in-flight target workers for one job. Must be > 0.
    pub max_concurrency: usize,
    /// Retry attempts per target after the first.
    pub max_retries: u32,
    /// Retry delay floor.
    pub base_backoff: Duration,
    /// Retry delay cap.
    pub max_backoff: Duration,
    /// Deadline for one full attempt against one target.
    pub per_target_timeout: Duration,
    /// Abort the job once `failed / completed` exceeds this fraction.
    pub error_threshold_fraction: f64,
    /// Minimum completed targets before the threshold is evaluated.
    pub min_sample: usize,
    /// Execute inside a transaction that is always rolled back; the ledger
    /// is never stamped.
    pub dry_run: bool,
    /// Resolution for a ledger entry whose checksum differs from the script.
    pub on_checksum_mismatch: ChecksumPolicy,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            per_target_timeout: DEFAULT_PER_TARGET_TIMEOUT,
            error_threshold_fraction: DEFAULT_ERROR_THRESHOLD,
            min_sample: DEFAULT_MIN_SAMPLE,
            dry_run: false,
            on_checksum_mismatch: ChecksumPolicy::default(),
        }
    }
}

impl PropagationPolicy {
    /// Validate the policy at job submission.
    ///
    /// Rules:
    /// - `max_concurrency` must be greater than zero.
    /// - `error_threshold_fraction` must be within `0.0..=1.0`.
    /// - `base_backoff` must not exceed `max_backoff`.
    /// - `per_target_timeout` must be non-zero.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.max_concurrency == 0 {
            return Err(CoreError::Validation(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.error_threshold_fraction) {
            return Err(CoreError::Validation(format!(
                "error_threshold_fraction must be within 0.0..=1.0, got {}",
                self.error_threshold_fraction
            )));
        }
        if self.base_backoff > self.max_backoff {
            return Err(CoreError::Validation(
                "base_backoff must not exceed max_backoff".to_string(),
            ));
        }
        if self.per_target_timeout.is_zero() {
            return Err(CoreError::Validation(
                "per_target_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        assert!(PropagationPolicy::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_rejected() {
        let policy = PropagationPolicy {
            max_concurrency: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn threshold_above_one_rejected() {
        let policy = PropagationPolicy {
            error_threshold_fraction: 1.5,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn inverted_backoff_bounds_rejected() {
        let policy = PropagationPolicy {
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        let policy = PropagationPolicy {
            per_target_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn checksum_policy_defaults_to_skip() {
        assert_eq!(ChecksumPolicy::default(), ChecksumPolicy::Skip);
    }

    #[test]
    fn checksum_policy_serializes_snake_case() {
        let json = serde_json::to_string(&ChecksumPolicy::Reapply).unwrap();
        assert_eq!(json, "\"reapply\"");
    }
}
