//! Retry policy for host-executed activities

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::BenchError;

/// How the activity host retries a failed attempt
///
/// Delays grow geometrically from `initial_interval` by `backoff_coefficient`,
/// capped at `max_interval`, with optional jitter.
///
/// # Example
///
/// ```
/// use stampede_bench::reliability::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::bench_default()
///     .with_max_attempts(3)
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(50));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor between consecutive delays
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0)
    pub jitter: f64,

    /// Error types that must never be retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::bench_default()
    }
}

impl RetryPolicy {
    /// Policy used for driver and monitor activities
    ///
    /// - 10 max attempts
    /// - 50 ms initial interval, x1.2 backoff, 10 s cap
    /// - no jitter
    /// - `TimedOut`, `InvalidSpec` and `Cancelled` are never retried
    pub fn bench_default() -> Self {
        Self {
            max_attempts: 10,
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 1.2,
            jitter: 0.0,
            non_retryable_errors: vec![
                "TimedOut".to_string(),
                "InvalidSpec".to_string(),
                "Cancelled".to_string(),
            ],
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Delay to wait before starting `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let retry_num = attempt - 1;
        let base = self.initial_interval.as_secs_f64()
            * self.backoff_coefficient.powi(retry_num as i32 - 1);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let range = capped * self.jitter;
            (capped + rand::thread_rng().gen_range(-range..range)).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether `error` may be retried under this policy
    pub fn should_retry(&self, error: &BenchError) -> bool {
        error.is_retryable()
            && !self
                .non_retryable_errors
                .iter()
                .any(|t| t == error.error_type())
    }

    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn test_bench_defaults() {
        let policy = RetryPolicy::bench_default();
        assert_eq!(policy.max_attempts, 10);
        assert_eq!(policy.initial_interval, Duration::from_millis(50));
        assert_eq!(policy.backoff_coefficient, 1.2);
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::bench_default()
            .with_initial_interval(Duration::from_secs(1))
            .with_backoff_coefficient(2.0)
            .with_max_interval(Duration::from_secs(5));

        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::bench_default()
            .with_initial_interval(Duration::from_secs(1))
            .with_jitter(0.1);

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(900));
            assert!(delay <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::bench_default();

        assert!(!policy.should_retry(&BenchError::timed_out("deadline")));
        assert!(!policy.should_retry(&BenchError::InvalidSpec("bad".into())));
        assert!(!policy.should_retry(&BenchError::Cancelled));
        assert!(policy.should_retry(&BenchError::Start {
            id: "x".into(),
            source: StoreError::Unavailable("down".into()),
        }));
    }

    #[test]
    fn test_custom_non_retryable_type() {
        let policy = RetryPolicy::bench_default().with_non_retryable_error("StoreFailed");
        let err = BenchError::store("listing", StoreError::Backend("x".into()));
        assert!(!policy.should_retry(&err));
    }

    #[test]
    fn test_has_attempts_remaining() {
        let policy = RetryPolicy::bench_default().with_max_attempts(3);

        assert!(policy.has_attempts_remaining(1));
        assert!(policy.has_attempts_remaining(2));
        assert!(!policy.has_attempts_remaining(3));
        assert!(!RetryPolicy::no_retry().has_attempts_remaining(1));
    }

    #[test]
    fn test_serialization() {
        let policy = RetryPolicy::bench_default().with_max_attempts(4);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
