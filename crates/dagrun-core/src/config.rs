//! Engine runtime configuration.

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::retry::RetryPolicy;

/// Top-level engine configuration. Per-node policies override the defaults
/// carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Upper bound on concurrently executing agents.
    pub worker_pool_size: usize,
    /// Per-attempt deadline when no probe timeout applies.
    pub default_timeout: Duration,
    /// Default retry policy for nodes that carry none.
    pub retry: RetryPolicy,
    /// Default breaker policy for nodes that carry none.
    pub circuit_breaker: CircuitBreakerPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 10,
            default_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(1),
            circuit_breaker: CircuitBreakerPolicy::default(),
        }
    }
}

impl RouterConfig {
    /// Clamps every field into its valid range; applied once at engine
    /// construction.
    pub(crate) fn normalized(mut self) -> Self {
        if self.worker_pool_size < 1 {
            self.worker_pool_size = 1;
        }
        if self.default_timeout.is_zero() {
            self.default_timeout = Duration::from_secs(30);
        }
        self.retry = self.retry.normalized();
        self.circuit_breaker = self.circuit_breaker.normalized();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_fills_defaults() {
        let config = RouterConfig {
            worker_pool_size: 0,
            default_timeout: Duration::ZERO,
            retry: RetryPolicy::new(0),
            circuit_breaker: CircuitBreakerPolicy {
                failure_threshold: 2,
                reset_timeout: Duration::ZERO,
                probe_timeout: Duration::ZERO,
            },
        }
        .normalized();

        assert_eq!(config.worker_pool_size, 1);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_secs(60));
    }
}
