//! Retry policy and backoff arithmetic.
//!
//! Backoff is a pure function of the strategy and the attempt number. The
//! jitter variant derives its spread from the attempt alone, so a recorded
//! run replays with identical timing decisions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::agent::AgentError;

const BASE: Duration = Duration::from_millis(100);

/// Wait-time growth between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    #[default]
    Linear,
    Exponential,
    ExponentialJitter,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::ExponentialJitter => write!(f, "exponential_jitter"),
        }
    }
}

/// Per-node retry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 normalize to 1.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    /// Error display strings eligible for retry. Empty means every error
    /// is retryable.
    pub retryable_errors: Vec<String>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_retryable_error(mut self, message: impl Into<String>) -> Self {
        self.retryable_errors.push(message.into());
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        if self.max_attempts < 1 {
            self.max_attempts = 1;
        }
        self
    }

    /// Whether `error` is eligible for another attempt under this policy.
    pub fn is_retryable(&self, error: &AgentError) -> bool {
        self.retryable_errors.is_empty()
            || self
                .retryable_errors
                .iter()
                .any(|candidate| candidate == &error.to_string())
    }
}

/// Sleep interval before the attempt that follows `attempt` (1-based).
pub fn backoff_duration(strategy: BackoffStrategy, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    match strategy {
        BackoffStrategy::Linear => BASE * attempt,
        BackoffStrategy::Exponential => BASE * exponential_factor(attempt),
        BackoffStrategy::ExponentialJitter => {
            let jitter = Duration::from_millis(u64::from(attempt) * 37 % 100);
            BASE * exponential_factor(attempt) + jitter
        }
    }
}

// Caps the shift so a misconfigured max_attempts cannot overflow.
fn exponential_factor(attempt: u32) -> u32 {
    1u32 << (attempt - 1).min(16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_grows_with_attempt() {
        assert_eq!(
            backoff_duration(BackoffStrategy::Linear, 1),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff_duration(BackoffStrategy::Linear, 3),
            Duration::from_millis(300)
        );
    }

    #[test]
    fn exponential_doubles() {
        assert_eq!(
            backoff_duration(BackoffStrategy::Exponential, 1),
            Duration::from_millis(100)
        );
        assert_eq!(
            backoff_duration(BackoffStrategy::Exponential, 4),
            Duration::from_millis(800)
        );
    }

    #[test]
    fn jitter_is_deterministic() {
        // 2^(3-1) * 100ms + (3*37 % 100)ms = 400ms + 11ms
        let first = backoff_duration(BackoffStrategy::ExponentialJitter, 3);
        assert_eq!(first, Duration::from_millis(411));
        assert_eq!(backoff_duration(BackoffStrategy::ExponentialJitter, 3), first);
    }

    #[test]
    fn empty_filter_retries_everything() {
        let policy = RetryPolicy::new(3);
        assert!(policy.is_retryable(&AgentError::Timeout));
        assert!(policy.is_retryable(&AgentError::failure("boom")));
    }

    #[test]
    fn filter_matches_on_display_string() {
        let policy = RetryPolicy::new(3).with_retryable_error("agent timeout");
        assert!(policy.is_retryable(&AgentError::Timeout));
        assert!(!policy.is_retryable(&AgentError::failure("boom")));
    }

    #[test]
    fn normalization_clamps_attempts() {
        assert_eq!(RetryPolicy::new(0).normalized().max_attempts, 1);
        assert_eq!(RetryPolicy::new(5).normalized().max_attempts, 5);
    }
}
