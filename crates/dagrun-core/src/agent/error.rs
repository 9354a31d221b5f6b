//! Error types for agent registration and invocation.

use thiserror::Error;

/// Registration failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("agent id is empty")]
    EmptyAgentId,
    #[error("agent id already registered: {0}")]
    DuplicateAgentId(String),
}

/// Per-invocation failure.
///
/// These are recovered locally by the engine: they end up in the
/// [`AgentResult`](crate::engine::AgentResult) and the trace, never as an
/// unwind across the engine boundary. The display string is the stable
/// identity used by trace replay and by the retryable-errors filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    /// Registry lookup failed; never retried.
    #[error("agent not registered: {0}")]
    NotRegistered(String),
    /// Circuit breaker refused the call; no attempt was made.
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),
    /// An upstream invocation failed, so this one was skipped.
    #[error("dependency failed: {dependency}: {cause}")]
    DependencyFailed { dependency: String, cause: String },
    /// The per-attempt deadline fired.
    #[error("agent timeout")]
    Timeout,
    /// The agent terminated abnormally; the panic payload is preserved.
    #[error("agent panic: {0}")]
    Panic(String),
    /// The outer run context was cancelled.
    #[error("invocation cancelled")]
    Cancelled,
    /// Failure reported by the agent itself.
    #[error("{0}")]
    Failure(String),
}

impl AgentError {
    /// Failure with an agent-supplied message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure(message.into())
    }
}
