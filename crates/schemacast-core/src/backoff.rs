//! Retry backoff computation.
//!
//! Delays grow exponentially from a floor to a cap, with a uniform ±20%
//! jitter so a fleet of retrying workers does not thunder back in step.
//! Resource-exhaustion failures wait twice as long before the cap applies.

use std::time::Duration;

use rand::Rng;

/// Jitter fraction applied around the computed delay.
const JITTER_FRACTION: f64 = 0.2;

/// Multiplier applied before the cap when the pooler rejected us for
/// capacity reasons.
const RESOURCE_EXHAUSTION_FACTOR: u32 = 2;

/// Compute the deterministic backoff delay for a retry attempt.
///
/// `attempt` is zero-based: the delay before the first retry uses
/// `attempt = 0` and equals `base`. The result is clamped to `max`.
pub fn delay_for_attempt(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

/// Compute the backoff delay for a retry attempt, elongated for resource
/// exhaustion and with jitter applied.
pub fn retry_delay(
    attempt: u32,
    base: Duration,
    max: Duration,
    resource_exhausted: bool,
) -> Duration {
    let mut delay = delay_for_attempt(attempt, base, max);
    if resource_exhausted {
        delay = delay.checked_mul(RESOURCE_EXHAUSTION_FACTOR).unwrap_or(max).min(max);
    }
    with_jitter(delay)
}

/// Apply a uniform ±20% jitter to a delay.
pub fn with_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let spread = delay.as_secs_f64() * JITTER_FRACTION;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}
