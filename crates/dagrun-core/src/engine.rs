//! The execution engine.
//!
//! [`Engine::run_plan`] validates the plan into topological levels, then
//! walks the levels in order: every invocation in a level whose
//! dependencies all succeeded is dispatched onto a bounded worker pool, and
//! the next level starts only after the whole level completed. Each worker
//! runs the retry / circuit-breaker / timeout / panic-isolation state
//! machine for one node and appends per-attempt steps to the trace
//! recorder.
//!
//! Workers finish in arbitrary real-time order; determinism is restored at
//! the edges: results are keyed and returned in ascending invocation-id
//! order, and the recorder re-sorts trace steps canonically on finalize.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{invoke_guarded, AgentError, AgentHandler, AgentInput, AgentOutput, Registry, RegistryError};
use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerPolicy};
use crate::config::RouterConfig;
use crate::metrics::{
    MetricsRecorder, NoopRecorder, STATUS_CIRCUIT_OPEN, STATUS_ERROR, STATUS_SUCCESS,
};
use crate::plan::{AgentInvocation, ExecutionPlan, PlanError, PlanGraph, PlanNode};
use crate::retry::{backoff_duration, RetryPolicy};
use crate::trace::{ExecutionTrace, TraceRecorder, TraceStep};

/// Synthetic identifiers used for plan-validation trace steps.
const PLAN_VALIDATION_ID: &str = "plan_validation";
const ROUTER_AGENT_ID: &str = "router";

/// Execution outcome for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResult {
    pub invocation: AgentInvocation,
    pub output: AgentOutput,
    pub error: Option<AgentError>,
}

impl AgentResult {
    fn failed(invocation: AgentInvocation, error: AgentError) -> Self {
        Self {
            invocation,
            output: AgentOutput::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Errors surfaced to the caller alongside the result/trace pair.
///
/// Per-invocation failures never appear here; they are recovered into
/// [`AgentResult::error`] and the trace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("plan validation failed: {0}")]
    Plan(#[from] PlanError),
    #[error("run cancelled")]
    Cancelled,
}

/// What a run returns: results sorted by invocation id, the finalized
/// trace, and the overarching error when the plan never executed or the
/// run was cancelled. Both collections are well-formed in every case.
#[derive(Debug)]
pub struct RunReport {
    pub results: Vec<AgentResult>,
    pub trace: ExecutionTrace,
    pub error: Option<EngineError>,
}

/// Coordinates agent execution over validated plans.
///
/// Breaker state persists across runs of one engine instance; recorder
/// state lives only within a single [`Engine::run_plan`] call.
pub struct Engine {
    registry: Arc<Registry>,
    breaker: Arc<CircuitBreaker>,
    metrics: RwLock<Arc<dyn MetricsRecorder>>,
    config: RouterConfig,
}

impl Engine {
    pub fn new(registry: Registry, config: RouterConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            breaker: Arc::new(CircuitBreaker::new()),
            metrics: RwLock::new(Arc::new(NoopRecorder)),
            config: config.normalized(),
        }
    }

    /// Registers a handler under the default version.
    pub fn register_agent(
        &self,
        agent_id: &str,
        handler: impl AgentHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.registry.register(agent_id, handler)
    }

    pub fn register_agent_version(
        &self,
        agent_id: &str,
        version: &str,
        handler: impl AgentHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.registry.register_version(agent_id, version, handler)
    }

    /// Swaps the injected metrics recorder.
    pub fn set_metrics_recorder(&self, recorder: Arc<dyn MetricsRecorder>) {
        *self.metrics.write() = recorder;
    }

    /// Shared handle to the underlying registry (useful as a replay
    /// resolver).
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Convenience: runs `invocations` as independent plan nodes.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        invocations: Vec<AgentInvocation>,
    ) -> RunReport {
        let task_id = invocations
            .first()
            .map(|invocation| invocation.input.task_id.clone())
            .unwrap_or_default();
        let nodes = invocations.into_iter().map(PlanNode::new).collect();
        self.run_plan(cancel, ExecutionPlan::new(task_id, nodes)).await
    }

    /// Executes `plan` level by level and returns results plus the
    /// finalized trace.
    pub async fn run_plan(&self, cancel: &CancellationToken, plan: ExecutionPlan) -> RunReport {
        let recorder = Arc::new(TraceRecorder::new(&plan.task_id, Utc::now()));

        let graph = match PlanGraph::build(&plan) {
            Ok(graph) => graph,
            Err(plan_err) => {
                warn!(task_id = %plan.task_id, error = %plan_err, "plan validation failed");
                recorder.add_step(TraceStep {
                    invocation_id: PLAN_VALIDATION_ID.to_string(),
                    agent_id: ROUTER_AGENT_ID.to_string(),
                    error: plan_err.to_string(),
                    attempt: 0,
                    ..TraceStep::default()
                });
                let result = AgentResult::failed(
                    AgentInvocation::new(PLAN_VALIDATION_ID, ROUTER_AGENT_ID, AgentInput::default()),
                    AgentError::failure(plan_err.to_string()),
                );
                return RunReport {
                    results: vec![result],
                    trace: recorder.finalize(Utc::now()),
                    error: Some(EngineError::Plan(plan_err)),
                };
            }
        };

        info!(
            task_id = %plan.task_id,
            nodes = graph.len(),
            levels = graph.levels().len(),
            workers = self.config.worker_pool_size,
            "executing plan"
        );

        let shared = Arc::new(WorkerShared {
            registry: self.registry.clone(),
            breaker: self.breaker.clone(),
            metrics: self.metrics.read().clone(),
            recorder: recorder.clone(),
            default_timeout: self.config.default_timeout,
            semaphore: Arc::new(Semaphore::new(self.config.worker_pool_size)),
            cancel: cancel.clone(),
        });

        let mut completed: BTreeMap<String, AgentResult> = BTreeMap::new();
        for (level_index, level) in graph.levels().iter().enumerate() {
            debug!(level = level_index, invocations = level.len(), "dispatching level");
            let mut handles = Vec::with_capacity(level.len());

            for invocation_id in level {
                let Some(node) = graph.node(invocation_id).cloned() else {
                    continue;
                };

                if let Some((dependency, cause)) = failed_dependency(&node, &completed) {
                    let error = AgentError::DependencyFailed { dependency, cause };
                    shared.recorder.add_step(TraceStep {
                        invocation_id: node.invocation.id.clone(),
                        agent_id: node.invocation.agent_id.clone(),
                        request_id: node.invocation.input.request_id.clone(),
                        input: node.invocation.input.clone(),
                        error: error.to_string(),
                        attempt: 0,
                        ..TraceStep::default()
                    });
                    let result = AgentResult::failed(node.invocation, error);
                    completed.insert(result.invocation.id.clone(), result);
                    continue;
                }

                let retry = node
                    .retry
                    .clone()
                    .unwrap_or_else(|| self.config.retry.clone())
                    .normalized();
                let breaker_policy = node
                    .circuit_breaker
                    .clone()
                    .unwrap_or_else(|| self.config.circuit_breaker.clone())
                    .normalized();

                let invocation = node.invocation.clone();
                let worker_shared = shared.clone();
                let handle = tokio::spawn(async move {
                    execute_node(worker_shared, node, retry, breaker_policy).await
                });
                handles.push((invocation, handle));
            }

            // Level barrier: level k+1 starts only after every worker of
            // level k has completed.
            let (invocations, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
            let outcomes = futures::future::join_all(tasks).await;
            for (invocation, outcome) in invocations.into_iter().zip(outcomes) {
                let result = match outcome {
                    Ok(result) => result,
                    Err(join_err) => {
                        // Agent panics are converted inside execute_node; a
                        // JoinError here means the worker itself died.
                        warn!(
                            invocation_id = %invocation.id,
                            error = %join_err,
                            "worker task failed"
                        );
                        AgentResult::failed(
                            invocation,
                            AgentError::Panic(join_err.to_string()),
                        )
                    }
                };
                completed.insert(result.invocation.id.clone(), result);
            }
        }

        let error = cancel.is_cancelled().then_some(EngineError::Cancelled);
        RunReport {
            results: completed.into_values().collect(),
            trace: recorder.finalize(Utc::now()),
            error,
        }
    }
}

struct WorkerShared {
    registry: Arc<Registry>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsRecorder>,
    recorder: Arc<TraceRecorder>,
    default_timeout: Duration,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

/// First failed dependency of `node`, in normalized (ascending) order.
fn failed_dependency(
    node: &PlanNode,
    completed: &BTreeMap<String, AgentResult>,
) -> Option<(String, String)> {
    node.depends_on.iter().find_map(|dependency| {
        completed
            .get(dependency)
            .and_then(|result| result.error.as_ref())
            .map(|error| (dependency.clone(), error.to_string()))
    })
}

/// Runs the full per-node state machine: worker-slot acquisition, registry
/// lookup, circuit gate, then the attempt loop.
async fn execute_node(
    shared: Arc<WorkerShared>,
    node: PlanNode,
    retry: RetryPolicy,
    breaker_policy: CircuitBreakerPolicy,
) -> AgentResult {
    let invocation = node.invocation;
    let agent_id = invocation.agent_id.clone();

    let _permit = tokio::select! {
        _ = shared.cancel.cancelled() => {
            return AgentResult::failed(invocation, AgentError::Cancelled);
        }
        permit = shared.semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_closed) => {
                return AgentResult::failed(invocation, AgentError::Cancelled);
            }
        }
    };

    let Some(handler) = shared.registry.get(&agent_id) else {
        let error = AgentError::NotRegistered(agent_id.clone());
        shared.recorder.add_step(TraceStep {
            invocation_id: invocation.id.clone(),
            agent_id: agent_id.clone(),
            request_id: invocation.input.request_id.clone(),
            input: invocation.input.clone(),
            error: error.to_string(),
            attempt: 1,
            ..TraceStep::default()
        });
        shared
            .metrics
            .observe_invocation(&agent_id, STATUS_ERROR, Duration::ZERO);
        return AgentResult::failed(invocation, error);
    };

    let attempt_timeout = match shared
        .breaker
        .allow(&agent_id, &breaker_policy, Instant::now())
    {
        Admission::Rejected => {
            let error = AgentError::CircuitOpen(agent_id.clone());
            shared.recorder.add_step(TraceStep {
                invocation_id: invocation.id.clone(),
                agent_id: agent_id.clone(),
                request_id: invocation.input.request_id.clone(),
                input: invocation.input.clone(),
                error: error.to_string(),
                attempt: 0,
                ..TraceStep::default()
            });
            shared
                .metrics
                .observe_invocation(&agent_id, STATUS_CIRCUIT_OPEN, Duration::ZERO);
            shared.metrics.observe_circuit_open(&agent_id);
            return AgentResult::failed(invocation, error);
        }
        Admission::Granted { probe: true } if !breaker_policy.probe_timeout.is_zero() => {
            debug!(agent_id = %agent_id, "half-open probe admitted");
            breaker_policy.probe_timeout
        }
        Admission::Granted { .. } => shared.default_timeout,
    };

    let mut last_error: Option<AgentError> = None;
    for attempt in 1..=retry.max_attempts {
        let start = Instant::now();
        let outcome = invoke_guarded(
            handler.clone(),
            invocation.input.clone(),
            attempt_timeout,
            &shared.cancel,
        )
        .await;
        let duration = start.elapsed();

        match outcome {
            Ok(mut output) => {
                if output.duration.is_zero() {
                    output.duration = duration;
                }
                shared.breaker.record_success(&agent_id);
                shared
                    .metrics
                    .observe_invocation(&agent_id, STATUS_SUCCESS, duration);
                shared.recorder.add_step(TraceStep {
                    invocation_id: invocation.id.clone(),
                    agent_id: agent_id.clone(),
                    request_id: invocation.input.request_id.clone(),
                    input: invocation.input.clone(),
                    output: output.clone(),
                    duration,
                    attempt,
                    ..TraceStep::default()
                });
                return AgentResult {
                    invocation,
                    output,
                    error: None,
                };
            }
            Err(error) => {
                let opened =
                    shared
                        .breaker
                        .record_failure(&agent_id, &breaker_policy, Instant::now());
                if opened {
                    warn!(agent_id = %agent_id, error = %error, "circuit breaker opened");
                }
                shared
                    .metrics
                    .observe_invocation(&agent_id, STATUS_ERROR, duration);
                shared.recorder.add_step(TraceStep {
                    invocation_id: invocation.id.clone(),
                    agent_id: agent_id.clone(),
                    request_id: invocation.input.request_id.clone(),
                    input: invocation.input.clone(),
                    error: error.to_string(),
                    duration,
                    attempt,
                    ..TraceStep::default()
                });

                let cancelled = error == AgentError::Cancelled;
                let retryable = retry.is_retryable(&error);
                last_error = Some(error);
                if cancelled || attempt == retry.max_attempts || !retryable {
                    break;
                }

                shared.metrics.observe_retry(&agent_id);
                tokio::select! {
                    _ = shared.cancel.cancelled() => {
                        last_error = Some(AgentError::Cancelled);
                        break;
                    }
                    _ = tokio::time::sleep(backoff_duration(retry.backoff, attempt)) => {}
                }
            }
        }
    }

    let error = last_error.unwrap_or_else(|| AgentError::failure("no attempt executed"));
    AgentResult::failed(invocation, error)
}
