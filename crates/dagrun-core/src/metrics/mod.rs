//! Metric hooks for engine instrumentation.
//!
//! The engine reports three events: an invocation outcome (status
//! `"success"`, `"error"`, or `"circuit_open"` with its duration), a retry,
//! and a circuit-breaker refusal. Recorders must be safe to call from
//! concurrent workers. A [`NoopRecorder`] is installed by default so the
//! hot path never checks for absence.

mod prometheus;

pub use self::prometheus::PrometheusRecorder;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_CIRCUIT_OPEN: &str = "circuit_open";

/// Minimal metric hooks consumed by the engine.
pub trait MetricsRecorder: Send + Sync {
    fn observe_invocation(&self, agent_id: &str, status: &str, duration: Duration);
    fn observe_retry(&self, agent_id: &str);
    fn observe_circuit_open(&self, agent_id: &str);
}

/// Discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricsRecorder for NoopRecorder {
    fn observe_invocation(&self, _agent_id: &str, _status: &str, _duration: Duration) {}
    fn observe_retry(&self, _agent_id: &str) {}
    fn observe_circuit_open(&self, _agent_id: &str) {}
}

/// Per-agent counters in a snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AgentStats {
    pub successes: u64,
    pub errors: u64,
    pub retries: u64,
    pub circuit_opens: u64,
    pub total_duration: Duration,
}

/// Aggregated in-memory runtime metrics.
#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub total_invocations: u64,
    pub error_invocations: u64,
    pub retry_attempts: u64,
    pub circuit_open_events: u64,
    pub by_agent: HashMap<String, AgentStats>,
}

/// Records metrics in-process, for local observability and tests.
#[derive(Default)]
pub struct InMemoryRecorder {
    inner: Mutex<Snapshot>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.lock().clone()
    }
}

impl MetricsRecorder for InMemoryRecorder {
    fn observe_invocation(&self, agent_id: &str, status: &str, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.total_invocations += 1;
        let stats = inner.by_agent.entry(agent_id.to_string()).or_default();
        if status == STATUS_SUCCESS {
            stats.successes += 1;
        } else {
            stats.errors += 1;
        }
        stats.total_duration += duration;
        if status != STATUS_SUCCESS {
            inner.error_invocations += 1;
        }
    }

    fn observe_retry(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        inner.retry_attempts += 1;
        inner
            .by_agent
            .entry(agent_id.to_string())
            .or_default()
            .retries += 1;
    }

    fn observe_circuit_open(&self, agent_id: &str) {
        let mut inner = self.inner.lock();
        inner.circuit_open_events += 1;
        inner
            .by_agent
            .entry(agent_id.to_string())
            .or_default()
            .circuit_opens += 1;
    }
}

/// Fans every observation out to a list of recorders.
#[derive(Default)]
pub struct MultiRecorder {
    recorders: Vec<Arc<dyn MetricsRecorder>>,
}

impl MultiRecorder {
    pub fn new(recorders: Vec<Arc<dyn MetricsRecorder>>) -> Self {
        Self { recorders }
    }

    pub fn push(&mut self, recorder: Arc<dyn MetricsRecorder>) {
        self.recorders.push(recorder);
    }
}

impl MetricsRecorder for MultiRecorder {
    fn observe_invocation(&self, agent_id: &str, status: &str, duration: Duration) {
        for recorder in &self.recorders {
            recorder.observe_invocation(agent_id, status, duration);
        }
    }

    fn observe_retry(&self, agent_id: &str) {
        for recorder in &self.recorders {
            recorder.observe_retry(agent_id);
        }
    }

    fn observe_circuit_open(&self, agent_id: &str) {
        for recorder in &self.recorders {
            recorder.observe_circuit_open(agent_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_recorder_aggregates_by_agent() {
        let recorder = InMemoryRecorder::new();
        recorder.observe_invocation("a", STATUS_SUCCESS, Duration::from_millis(5));
        recorder.observe_invocation("a", STATUS_ERROR, Duration::from_millis(3));
        recorder.observe_invocation("b", STATUS_CIRCUIT_OPEN, Duration::ZERO);
        recorder.observe_retry("a");
        recorder.observe_circuit_open("b");

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_invocations, 3);
        assert_eq!(snapshot.error_invocations, 2);
        assert_eq!(snapshot.retry_attempts, 1);
        assert_eq!(snapshot.circuit_open_events, 1);

        let a = &snapshot.by_agent["a"];
        assert_eq!((a.successes, a.errors, a.retries), (1, 1, 1));
        assert_eq!(a.total_duration, Duration::from_millis(8));
        assert_eq!(snapshot.by_agent["b"].circuit_opens, 1);
    }

    #[test]
    fn multi_recorder_fans_out() {
        let first = Arc::new(InMemoryRecorder::new());
        let second = Arc::new(InMemoryRecorder::new());
        let multi = MultiRecorder::new(vec![first.clone(), second.clone()]);

        multi.observe_invocation("a", STATUS_SUCCESS, Duration::from_millis(1));
        multi.observe_retry("a");

        assert_eq!(first.snapshot().total_invocations, 1);
        assert_eq!(second.snapshot().retry_attempts, 1);
    }
}
