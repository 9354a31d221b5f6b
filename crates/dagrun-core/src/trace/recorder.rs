//! Thread-safe append sink for trace steps.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{ExecutionTrace, TraceStep};

/// Collects per-attempt steps during one run and finalizes them in
/// canonical order.
///
/// `add_step` takes the step by value: from that point the recorder owns
/// the payload and metadata exclusively, so later mutation by agents cannot
/// retroactively alter the record. Finalize is idempotent: it snapshots
/// and sorts a copy, leaving the internal buffer order untouched.
pub struct TraceRecorder {
    inner: Mutex<Inner>,
}

struct Inner {
    task_id: String,
    start_time: DateTime<Utc>,
    steps: Vec<TraceStep>,
}

impl TraceRecorder {
    pub fn new(task_id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                task_id: task_id.into(),
                start_time,
                steps: Vec::new(),
            }),
        }
    }

    pub fn add_step(&self, step: TraceStep) {
        self.inner.lock().steps.push(step);
    }

    /// Number of steps recorded so far.
    pub fn len(&self) -> usize {
        self.inner.lock().steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().steps.is_empty()
    }

    /// Returns the canonically sorted trace as of `end_time`.
    pub fn finalize(&self, end_time: DateTime<Utc>) -> ExecutionTrace {
        let inner = self.inner.lock();
        let mut steps = inner.steps.clone();
        steps.sort_by(|left, right| left.canonical_cmp(right));

        let total_latency = (end_time - inner.start_time)
            .to_std()
            .unwrap_or_default();
        ExecutionTrace {
            task_id: inner.task_id.clone(),
            start_time: inner.start_time,
            end_time,
            total_latency,
            steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn step(invocation: &str, attempt: u32) -> TraceStep {
        TraceStep {
            invocation_id: invocation.to_string(),
            attempt,
            ..TraceStep::default()
        }
    }

    #[test]
    fn finalize_sorts_canonically_and_computes_latency() {
        let start = Utc::now();
        let recorder = TraceRecorder::new("task_1", start);
        recorder.add_step(step("b", 1));
        recorder.add_step(step("a", 2));
        recorder.add_step(step("a", 1));

        let end = start + TimeDelta::milliseconds(250);
        let trace = recorder.finalize(end);

        assert_eq!(trace.task_id, "task_1");
        assert_eq!(trace.total_latency, std::time::Duration::from_millis(250));
        let order: Vec<(String, u32)> = trace
            .steps
            .iter()
            .map(|s| (s.invocation_id.clone(), s.attempt))
            .collect();
        assert_eq!(
            order,
            vec![("a".into(), 1), ("a".into(), 2), ("b".into(), 1)]
        );
    }

    #[test]
    fn finalize_is_idempotent() {
        let start = Utc::now();
        let recorder = TraceRecorder::new("task_2", start);
        recorder.add_step(step("z", 1));
        recorder.add_step(step("a", 1));

        let first = recorder.finalize(start);
        let second = recorder.finalize(start);
        assert_eq!(first, second);
        assert_eq!(recorder.len(), 2);
    }
}
