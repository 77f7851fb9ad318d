//! Retry backoff for failed external writes.
//!
//! Delay grows as `base * 2^attempt`, capped at a maximum interval, with
//! random jitter on top to prevent thundering herd when many records retry
//! after a tracker outage.

use std::time::Duration;

/// Retry limits for failed external writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Base delay in seconds for the first retry.
    pub base_secs: u64,
    /// Upper bound on a single retry delay, in seconds.
    pub max_interval_secs: u64,
    /// Attempts after which the record is parked for manual intervention.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 5,
            max_interval_secs: 900,
            max_attempts: 3,
        }
    }
}

/// Deterministic delay before retry number `attempt` (1-based).
pub fn retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    // 2^attempt with the shift clamped so it cannot overflow; the interval
    // cap makes large exponents equivalent anyway.
    let factor = 1u64 << attempt.min(32);
    let secs = policy
        .base_secs
        .saturating_mul(factor)
        .min(policy.max_interval_secs);
    Duration::from_secs(secs)
}

/// [`retry_delay`] plus 0-5000ms of random jitter.
pub fn jittered_retry_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    retry_delay(attempt, policy) + Duration::from_millis(random_jitter_ms())
}

/// Generate random jitter between 0 and 5000 milliseconds.
fn random_jitter_ms() -> u64 {
    let mut bytes = [0u8; 8];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    let random = u64::from_le_bytes(bytes);
    random % 5001
}
