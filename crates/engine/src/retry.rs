//! Per-node retry policy and backoff computation.

use std::time::Duration;

use nodes::NodeError;
use serde::{Deserialize, Deserializer, Serialize};

use crate::EngineError;

/// Governs how often and how quickly a failing node is re-run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// When false the node fails on its first error.
    pub retry_on_failure: bool,
    /// Base delay between attempts. Never negative.
    pub retry_delay_seconds: f64,
    /// Double the delay after every failed attempt.
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_on_failure: true,
            retry_delay_seconds: 1.0,
            exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Build a policy, rejecting out-of-range values.
    ///
    /// # Errors
    /// [`EngineError::InvalidRetryPolicy`] when `max_attempts` is 0 or the
    /// delay is negative or not finite.
    pub fn new(
        max_attempts: u32,
        retry_delay_seconds: f64,
        exponential_backoff: bool,
    ) -> Result<Self, EngineError> {
        if max_attempts == 0 {
            return Err(EngineError::InvalidRetryPolicy(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !retry_delay_seconds.is_finite() || retry_delay_seconds < 0.0 {
            return Err(EngineError::InvalidRetryPolicy(format!(
                "retry_delay_seconds must be a non-negative number, got {retry_delay_seconds}"
            )));
        }
        Ok(Self {
            max_attempts,
            retry_on_failure: true,
            retry_delay_seconds,
            exponential_backoff,
        })
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, retry_on_failure: false, ..Self::default() }
    }

    /// Whether another attempt follows the failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &NodeError) -> bool {
        self.retry_on_failure && error.is_retryable() && attempt < self.max_attempts
    }

    /// Delay to wait after the failed `attempt` (1-based):
    /// `delay * 2^(attempt-1)` with backoff, the flat delay otherwise.
    /// The result is capped at `cap` when given.
    pub fn delay_for(&self, attempt: u32, cap: Option<Duration>) -> Duration {
        let base = self.retry_delay_seconds.max(0.0);
        let secs = if self.exponential_backoff {
            let exponent = attempt.saturating_sub(1).min(1023) as i32;
            base * 2f64.powi(exponent)
        } else {
            base
        };
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        match cap {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }
}

#[derive(Deserialize)]
struct RawRetryPolicy {
    #[serde(default = "default_attempts")]
    max_attempts: u32,
    #[serde(default = "default_true")]
    retry_on_failure: bool,
    #[serde(default = "default_delay")]
    retry_delay_seconds: f64,
    #[serde(default = "default_true")]
    exponential_backoff: bool,
}

fn default_attempts() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_delay() -> f64 {
    1.0
}

// Deserialised policies are clamped into range rather than rejected.
impl<'de> Deserialize<'de> for RetryPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRetryPolicy::deserialize(deserializer)?;
        let delay = if raw.retry_delay_seconds.is_finite() {
            raw.retry_delay_seconds.max(0.0)
        } else {
            0.0
        };
        Ok(Self {
            max_attempts: raw.max_attempts.max(1),
            retry_on_failure: raw.retry_on_failure,
            retry_delay_seconds: delay,
            exponential_backoff: raw.exponential_backoff,
        })
    }
}
