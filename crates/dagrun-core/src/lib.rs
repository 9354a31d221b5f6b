//! dagrun core: a workload router for agent pipelines.
//!
//! The engine executes a declarative dependency graph of agent invocations
//! with per-node retry policies, per-agent circuit breakers, per-attempt
//! timeouts, and bounded worker concurrency, while capturing a
//! deterministic execution trace that can be replayed and bit-compared
//! afterwards.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use dagrun_core::{
//!     AgentInput, AgentInvocation, AgentOutput, Engine, ExecutionPlan, PlanNode, Registry,
//!     RouterConfig,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let registry = Registry::new();
//! registry
//!     .register("echo", |input: AgentInput| async move {
//!         Ok(AgentOutput::new(input.request_id.clone(), input.payload))
//!     })
//!     .unwrap();
//!
//! let engine = Engine::new(registry, RouterConfig::default());
//! let plan = ExecutionPlan::new(
//!     "task_demo",
//!     vec![PlanNode::new(AgentInvocation::new(
//!         "0001_echo",
//!         "echo",
//!         AgentInput::new("task_demo", "req_0001", b"hello".to_vec()),
//!     ))],
//! );
//!
//! let report = engine.run_plan(&CancellationToken::new(), plan).await;
//! assert!(report.results[0].is_success());
//! # }
//! ```

pub mod agent;
pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod manifest;
pub mod metrics;
pub mod plan;
pub mod retry;
pub mod trace;

mod wire;

pub use agent::{AgentError, AgentHandler, AgentInput, AgentOutput, Registry, RegistryError};
pub use circuit_breaker::{Admission, BreakerState, CircuitBreaker, CircuitBreakerPolicy};
pub use config::RouterConfig;
pub use engine::{AgentResult, Engine, EngineError, RunReport};
pub use manifest::{Manifest, ManifestError};
pub use plan::{AgentInvocation, ExecutionPlan, PlanError, PlanGraph, PlanNode};
pub use retry::{backoff_duration, BackoffStrategy, RetryPolicy};
pub use trace::{
    compare, format_divergences, load_from_file, replay_and_compare, save_to_file, AgentResolver,
    Divergence, ExecutionTrace, ReplayError, TraceRecorder, TraceStep,
};
