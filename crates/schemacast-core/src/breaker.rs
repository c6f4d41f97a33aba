//! Error-threshold circuit breaker.
//!
//! The dispatcher calls [`should_trip`] after every completion. The
//! denominator is completed targets, not the job total, so early failures
//! trip the breaker long before the fleet is exhausted.

/// Whether the job should abort given the observed failure fraction.
///
/// Trips when `failed / completed` strictly exceeds `threshold` and at
/// least `min_sample` targets have completed. A `min_sample` of zero means
/// the threshold is live from the first completion.
pub fn should_trip(failed: usize, completed: usize, min_sample: usize, threshold: f64) -> bool {
    if completed == 0 || completed < min_sample {
        return false;
    }
    (failed as f64 / completed as f64) > threshold
}
