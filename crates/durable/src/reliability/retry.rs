//! Activity retry policy
//!
//! Backoff grows by `backoff_coefficient` from `initial_interval` and is capped
//! at `max_interval`. Intervals serialize as fractional seconds.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

/// When and how often a failed activity attempt is retried
///
/// # Example
///
/// ```
/// use toolforge_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(200))
///     .with_max_interval(Duration::from_millis(500));
///
/// assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
/// assert_eq!(policy.next_delay(2), Some(Duration::from_millis(400)));
/// assert_eq!(policy.next_delay(3), Some(Duration::from_millis(500)));
/// assert_eq!(policy.next_delay(4), None);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub initial_interval: Duration,
    #[serde(with = "duration_secs")]
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
    /// Fraction of each delay randomized in both directions, 0.0 to 1.0
    #[serde(default)]
    pub jitter: f64,
    /// Error types that fail the activity on first occurrence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub non_retryable_error_types: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// 3 attempts, 1s initial interval doubling up to 10s, no jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            backoff_coefficient: 2.0,
            jitter: 0.0,
            non_retryable_error_types: Vec::new(),
        }
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self::exponential().with_max_attempts(1)
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
        self.backoff_coefficient = coefficient.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_non_retryable_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_error_types.push(error_type.into());
        self
    }

    /// Whether `error` may be retried at all, ignoring the attempt budget
    pub fn retries_error(&self, error: &ActivityError) -> bool {
        if !error.retryable {
            return false;
        }
        match error.error_type.as_deref() {
            Some(kind) => !self.non_retryable_error_types.iter().any(|t| t == kind),
            None => true,
        }
    }

    /// Delay before the attempt following `completed_attempt`, or `None` once
    /// the attempt budget is spent
    pub fn next_delay(&self, completed_attempt: u32) -> Option<Duration> {
        if completed_attempt >= self.max_attempts.max(1) {
            return None;
        }
        Some(self.jittered(self.backoff(completed_attempt)))
    }

    /// Un-jittered delay before retry number `retry` (1-based)
    fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_interval)
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
