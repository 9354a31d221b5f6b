//! Replay and comparison of recorded traces.
//!
//! Replay re-executes the final attempt of every recorded invocation with
//! its recorded input and bit-compares the outcome: error steps must
//! reproduce the exact error string, success steps must match request id
//! and payload bytes. [`compare`] diffs two traces offline by the same
//! final-attempt rule.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ExecutionTrace, TraceStep};
use crate::agent::{invoke_guarded, AgentHandler, Registry};

const DEFAULT_REPLAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Maps agent ids to runtime implementations during replay.
pub trait AgentResolver: Send + Sync {
    fn resolve(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>>;
}

impl AgentResolver for Registry {
    fn resolve(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        self.get(agent_id)
    }
}

impl<F> AgentResolver for F
where
    F: Fn(&str) -> Option<Arc<dyn AgentHandler>> + Send + Sync,
{
    fn resolve(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        (self)(agent_id)
    }
}

/// Replay failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplayError {
    #[error("trace replay: no steps to replay")]
    EmptyTrace,
    #[error("trace replay: agent not found: {0}")]
    AgentNotFound(String),
    #[error(
        "trace replay: invocation {invocation} diverged on {field}: expected {expected:?}, got {actual:?}"
    )]
    Divergence {
        invocation: String,
        field: String,
        expected: String,
        actual: String,
    },
}

impl ReplayError {
    fn divergence(
        invocation: &str,
        field: &str,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::Divergence {
            invocation: invocation.to_string(),
            field: field.to_string(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Re-invokes the final recorded attempt of every invocation and validates
/// output equality. `timeout` bounds each call; zero falls back to 30 s.
pub async fn replay_and_compare(
    trace: &ExecutionTrace,
    timeout: Duration,
    resolver: &dyn AgentResolver,
) -> Result<(), ReplayError> {
    if trace.steps.is_empty() {
        return Err(ReplayError::EmptyTrace);
    }
    let timeout = if timeout.is_zero() {
        DEFAULT_REPLAY_TIMEOUT
    } else {
        timeout
    };

    // Never-cancelled token: replay has no outer run context.
    let cancel = CancellationToken::new();

    for (invocation_id, expected) in final_steps(trace) {
        let handler = resolver
            .resolve(&expected.agent_id)
            .ok_or_else(|| ReplayError::AgentNotFound(expected.agent_id.clone()))?;

        debug!(
            invocation_id,
            agent_id = %expected.agent_id,
            attempt = expected.attempt,
            "replaying recorded invocation"
        );
        let outcome = invoke_guarded(handler, expected.input.clone(), timeout, &cancel).await;

        if !expected.error.is_empty() {
            match outcome {
                Err(actual) if actual.to_string() == expected.error => continue,
                Err(actual) => {
                    return Err(ReplayError::divergence(
                        invocation_id,
                        "error",
                        &expected.error,
                        actual.to_string(),
                    ));
                }
                Ok(_) => {
                    return Err(ReplayError::divergence(
                        invocation_id,
                        "error",
                        &expected.error,
                        "",
                    ));
                }
            }
        }

        let actual = match outcome {
            Ok(output) => output,
            Err(err) => {
                return Err(ReplayError::divergence(
                    invocation_id,
                    "error",
                    "",
                    err.to_string(),
                ));
            }
        };
        if actual.request_id != expected.output.request_id {
            return Err(ReplayError::divergence(
                invocation_id,
                "request_id",
                &expected.output.request_id,
                actual.request_id,
            ));
        }
        if actual.payload != expected.output.payload {
            return Err(ReplayError::divergence(
                invocation_id,
                "payload_hash",
                payload_hash(&expected.output.payload),
                payload_hash(&actual.payload),
            ));
        }
    }

    Ok(())
}

/// One field-level difference between two traces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    pub invocation_id: String,
    pub field: String,
    pub expected: String,
    pub actual: String,
}

/// Diffs two traces by the final-attempt-per-invocation rule. An empty
/// list means replay-equivalent behavior.
pub fn compare(expected: &ExecutionTrace, actual: &ExecutionTrace) -> Vec<Divergence> {
    let expected_final = final_steps(expected);
    let actual_final = final_steps(actual);

    let mut ids: Vec<&str> = expected_final.keys().copied().collect();
    for id in actual_final.keys() {
        if !expected_final.contains_key(id) {
            ids.push(id);
        }
    }
    ids.sort_unstable();

    let mut divergences = Vec::new();
    for id in ids {
        let (exp, act) = match (expected_final.get(id), actual_final.get(id)) {
            (Some(exp), Some(act)) => (*exp, *act),
            (None, Some(act)) => {
                divergences.push(Divergence {
                    invocation_id: id.to_string(),
                    field: "missing_expected".to_string(),
                    expected: String::new(),
                    actual: act.agent_id.clone(),
                });
                continue;
            }
            (Some(exp), None) => {
                divergences.push(Divergence {
                    invocation_id: id.to_string(),
                    field: "missing_actual".to_string(),
                    expected: exp.agent_id.clone(),
                    actual: String::new(),
                });
                continue;
            }
            (None, None) => continue,
        };

        let mut diff = |field: &str, expected: String, actual: String| {
            if expected != actual {
                divergences.push(Divergence {
                    invocation_id: id.to_string(),
                    field: field.to_string(),
                    expected,
                    actual,
                });
            }
        };
        diff("agent_id", exp.agent_id.clone(), act.agent_id.clone());
        diff("error", exp.error.clone(), act.error.clone());
        diff(
            "request_id",
            exp.output.request_id.clone(),
            act.output.request_id.clone(),
        );
        diff(
            "payload_hash",
            payload_hash(&exp.output.payload),
            payload_hash(&act.output.payload),
        );
    }
    divergences
}

/// Human-readable rendering of a divergence list.
pub fn format_divergences(divergences: &[Divergence]) -> String {
    if divergences.is_empty() {
        return "no divergence detected".to_string();
    }
    let mut out = String::from("trace divergence detected:\n");
    for d in divergences {
        let _ = writeln!(
            out,
            "- invocation={} field={} expected={:?} actual={:?}",
            d.invocation_id, d.field, d.expected, d.actual
        );
    }
    out
}

/// Highest-attempt step per invocation id, ascending by id.
fn final_steps(trace: &ExecutionTrace) -> BTreeMap<&str, &TraceStep> {
    let mut map: BTreeMap<&str, &TraceStep> = BTreeMap::new();
    for step in &trace.steps {
        match map.get(step.invocation_id.as_str()) {
            Some(existing) if step.attempt < existing.attempt => {}
            _ => {
                map.insert(&step.invocation_id, step);
            }
        }
    }
    map
}

fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentInput, AgentOutput};
    use chrono::Utc;

    fn trace_with(steps: Vec<TraceStep>) -> ExecutionTrace {
        ExecutionTrace {
            task_id: "task".to_string(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            total_latency: Duration::ZERO,
            steps,
        }
    }

    fn success_step(invocation: &str, agent: &str, attempt: u32, payload: &[u8]) -> TraceStep {
        TraceStep {
            invocation_id: invocation.to_string(),
            agent_id: agent.to_string(),
            request_id: "r1".to_string(),
            input: AgentInput::new("task", "r1", payload.to_vec()),
            output: AgentOutput::new("r1", payload.to_vec()),
            attempt,
            ..TraceStep::default()
        }
    }

    #[tokio::test]
    async fn empty_trace_fails() {
        let registry = Registry::new();
        let err = replay_and_compare(&trace_with(vec![]), Duration::ZERO, &registry)
            .await
            .unwrap_err();
        assert_eq!(err, ReplayError::EmptyTrace);
    }

    #[tokio::test]
    async fn missing_agent_fails() {
        let registry = Registry::new();
        let trace = trace_with(vec![success_step("1", "ghost", 1, b"x")]);
        let err = replay_and_compare(&trace, Duration::ZERO, &registry)
            .await
            .unwrap_err();
        assert_eq!(err, ReplayError::AgentNotFound("ghost".into()));
    }

    #[tokio::test]
    async fn replay_detects_payload_divergence() {
        let registry = Registry::new();
        registry
            .register("echo", |input: AgentInput| async move {
                Ok(AgentOutput::new(input.request_id.clone(), b"changed".to_vec()))
            })
            .unwrap();

        let trace = trace_with(vec![success_step("1", "echo", 1, b"original")]);
        let err = replay_and_compare(&trace, Duration::ZERO, &registry)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ReplayError::Divergence { ref field, .. } if field == "payload_hash")
        );
    }

    #[tokio::test]
    async fn replay_uses_highest_attempt_as_final_outcome() {
        let registry = Registry::new();
        registry
            .register("echo", |input: AgentInput| async move {
                Ok(AgentOutput::new(input.request_id.clone(), input.payload))
            })
            .unwrap();

        let mut failed = success_step("1", "echo", 1, b"ok");
        failed.error = "transient".to_string();
        failed.output = AgentOutput::default();
        let trace = trace_with(vec![failed, success_step("1", "echo", 2, b"ok")]);

        replay_and_compare(&trace, Duration::ZERO, &registry)
            .await
            .unwrap();
    }

    #[test]
    fn compare_reports_field_level_divergence() {
        let expected = trace_with(vec![success_step("1", "echo", 1, b"a")]);
        let actual = trace_with(vec![success_step("1", "echo", 1, b"b")]);

        let divergences = compare(&expected, &actual);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].field, "payload_hash");
        assert_eq!(divergences[0].invocation_id, "1");
    }

    #[test]
    fn compare_reports_missing_invocations() {
        let expected = trace_with(vec![
            success_step("1", "echo", 1, b"a"),
            success_step("2", "echo", 1, b"b"),
        ]);
        let actual = trace_with(vec![success_step("1", "echo", 1, b"a")]);

        let divergences = compare(&expected, &actual);
        assert_eq!(divergences.len(), 1);
        assert_eq!(divergences[0].field, "missing_actual");
        assert_eq!(divergences[0].invocation_id, "2");
    }

    #[test]
    fn identical_traces_have_no_divergence() {
        let trace = trace_with(vec![success_step("1", "echo", 1, b"a")]);
        assert!(compare(&trace, &trace).is_empty());
        assert_eq!(format_divergences(&[]), "no divergence detected");
    }
}
