//! Retry policies for activity dispatch
//!
//! A policy is an attempt budget plus a geometric backoff schedule.
//! Delays are stored as whole milliseconds so the policy serializes into
//! the journal without custom adapters, and jitter defaults to zero: a
//! replayed execution must observe the same scheduling decisions as the
//! original, so randomness is strictly opt-in.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff schedule and attempt budget for one activity
///
/// The delay before attempt k (k ≥ 2) starts at `first_delay_ms` and is
/// multiplied by `growth` per retry, clamped at `delay_cap_ms`.
///
/// # Example
///
/// ```
/// use rocketship_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::geometric(Duration::from_millis(50))
///     .with_attempts(3)
///     .with_growth(1.5);
///
/// assert_eq!(policy.delay_before(2), Duration::from_millis(50));
/// assert_eq!(policy.delay_before(3), Duration::from_millis(75));
/// assert!(!policy.allows_another_attempt(3));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Attempt budget, counting the initial execution
    pub max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    pub first_delay_ms: u64,

    /// Clamp applied to every computed delay, in milliseconds
    pub delay_cap_ms: u64,

    /// Geometric growth factor between consecutive retries
    pub growth: f64,

    /// Random spread applied to each delay (0.0-1.0); zero keeps the
    /// schedule replay-identical
    pub jitter_ratio: f64,

    /// Failure kinds (by wire name) that exhaust the budget immediately
    #[serde(default)]
    pub blocked_error_types: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::single_attempt()
    }
}

impl RetryPolicy {
    /// The default: one attempt, no retries even on transient failures
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            first_delay_ms: 0,
            delay_cap_ms: 0,
            growth: 1.0,
            jitter_ratio: 0.0,
            blocked_error_types: BTreeSet::new(),
        }
    }

    /// Geometric backoff starting at `first_delay`, doubling per retry,
    /// capped at 100x the starting delay, three attempts
    pub fn geometric(first_delay: Duration) -> Self {
        let first_delay_ms = first_delay.as_millis() as u64;
        Self {
            max_attempts: 3,
            first_delay_ms,
            delay_cap_ms: first_delay_ms.saturating_mul(100),
            growth: 2.0,
            jitter_ratio: 0.0,
            blocked_error_types: BTreeSet::new(),
        }
    }

    /// Evenly spaced retries: the same delay between every attempt
    pub fn spaced(every: Duration, attempts: u32) -> Self {
        let every_ms = every.as_millis() as u64;
        Self {
            max_attempts: attempts,
            first_delay_ms: every_ms,
            delay_cap_ms: every_ms,
            growth: 1.0,
            jitter_ratio: 0.0,
            blocked_error_types: BTreeSet::new(),
        }
    }

    /// Set the attempt budget
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay before the first retry
    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the clamp on computed delays
    pub fn with_delay_cap(mut self, cap: Duration) -> Self {
        self.delay_cap_ms = cap.as_millis() as u64;
        self
    }

    /// Set the geometric growth factor
    pub fn with_growth(mut self, growth: f64) -> Self {
        self.growth = growth;
        self
    }

    /// Set the jitter ratio (clamped to 0.0-1.0)
    pub fn with_jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Block a failure kind from being retried
    pub fn with_blocked_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.blocked_error_types.insert(error_type.into());
        self
    }

    /// Delay to wait before the given attempt number (1-based)
    ///
    /// Attempt 1 is the initial execution and never waits. Each retry
    /// multiplies the previous delay by the growth factor, clamped at the
    /// cap, so the schedule is `first, first*g, first*g², …` up to the cap.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 || self.first_delay_ms == 0 {
            return Duration::ZERO;
        }

        let cap = self.delay_cap_ms as f64;
        let mut delay = (self.first_delay_ms as f64).min(cap);
        for _ in 2..attempt {
            if delay >= cap {
                break;
            }
            delay = (delay * self.growth).min(cap);
        }

        if self.jitter_ratio > 0.0 && delay > 0.0 {
            let spread = delay * self.jitter_ratio;
            let offset = rand::thread_rng().gen_range(-spread..spread);
            delay = (delay + offset).max(0.0);
        }

        Duration::from_millis(delay.round() as u64)
    }

    /// Whether the budget permits an attempt after the current one
    pub fn allows_another_attempt(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Whether a failure of the given type may be retried under this
    /// policy
    pub fn retries(&self, error_type: &str) -> bool {
        !self.blocked_error_types.contains(error_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 1);
        assert!(!policy.allows_another_attempt(1));
        assert_eq!(policy.delay_before(2), Duration::ZERO);
    }

    #[test]
    fn test_geometric_schedule() {
        let policy = RetryPolicy::geometric(Duration::from_secs(1)).with_attempts(5);

        assert_eq!(policy.delay_before(1), Duration::ZERO);
        assert_eq!(policy.delay_before(2), Duration::from_secs(1));
        assert_eq!(policy.delay_before(3), Duration::from_secs(2));
        assert_eq!(policy.delay_before(4), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_clamped_at_cap() {
        let policy = RetryPolicy::geometric(Duration::from_secs(1))
            .with_attempts(20)
            .with_delay_cap(Duration::from_secs(5));

        assert_eq!(policy.delay_before(10), Duration::from_secs(5));
    }

    #[test]
    fn test_fractional_growth() {
        // 50ms first delay, 1.5 growth: retries wait 50ms then 75ms
        let policy = RetryPolicy::geometric(Duration::from_millis(50)).with_growth(1.5);

        assert_eq!(policy.delay_before(2), Duration::from_millis(50));
        assert_eq!(policy.delay_before(3), Duration::from_millis(75));
        assert!(!policy.allows_another_attempt(3));
    }

    #[test]
    fn test_spaced_schedule() {
        let policy = RetryPolicy::spaced(Duration::from_secs(5), 3);
        assert_eq!(policy.delay_before(2), Duration::from_secs(5));
        assert_eq!(policy.delay_before(3), Duration::from_secs(5));
        assert!(policy.allows_another_attempt(2));
        assert!(!policy.allows_another_attempt(3));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy::spaced(Duration::from_millis(1000), 3).with_jitter_ratio(0.1);

        for _ in 0..20 {
            let delay = policy.delay_before(2);
            assert!(delay >= Duration::from_millis(900), "delay {:?}", delay);
            assert!(delay <= Duration::from_millis(1100), "delay {:?}", delay);
        }
    }

    #[test]
    fn test_blocked_error_types() {
        let policy = RetryPolicy::geometric(Duration::from_millis(10))
            .with_blocked_error_type("assertion_failed")
            .with_blocked_error_type("timeout");

        assert!(!policy.retries("assertion_failed"));
        assert!(!policy.retries("timeout"));
        assert!(policy.retries("transient"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let policy = RetryPolicy::geometric(Duration::from_millis(250))
            .with_attempts(10)
            .with_blocked_error_type("permanent");

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
