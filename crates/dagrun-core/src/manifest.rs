//! Pipeline manifest: the YAML file front-ends feed the engine with.
//!
//! A manifest declares router settings, agent bindings (with retry and
//! breaker policies), and the pipeline steps with their dependencies. The
//! loader validates structure up front and converts the pipeline into an
//! [`ExecutionPlan`]; the engine itself never reads files.
//!
//! ```yaml
//! router:
//!   worker_pool_size: 4
//!   default_timeout: 5s
//! agents:
//!   - id: summarize_agent
//!     retry: { max_attempts: 2, backoff: exponential }
//!     circuit_breaker: { failure_threshold: 3, reset_timeout: 60s }
//! pipeline:
//!   - step: summarize_agent
//!   - step: classify_agent
//!     depends_on: summarize_agent
//! ```

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::agent::AgentInput;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::config::RouterConfig;
use crate::plan::{AgentInvocation, ExecutionPlan, PlanNode};
use crate::retry::{BackoffStrategy, RetryPolicy};

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest: read {path:?}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("manifest: parse {path:?}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("manifest: agents list is empty")]
    EmptyAgents,
    #[error("manifest: pipeline is empty")]
    EmptyPipeline,
    #[error("manifest: agent id is empty")]
    EmptyAgentId,
    #[error("manifest: duplicate agent id {0:?}")]
    DuplicateAgentId(String),
    #[error("manifest: pipeline step is empty")]
    EmptyStep,
    #[error("manifest: duplicate pipeline step {0:?}")]
    DuplicateStep(String),
    #[error("manifest: pipeline step {0:?} has no matching agent")]
    UnboundStep(String),
    #[error("manifest: step {0:?} cannot depend on itself")]
    SelfDependency(String),
    #[error("manifest: step {step:?} depends on unknown step {dependency:?}")]
    UnknownDependency { step: String, dependency: String },
    #[error("manifest: cycle detected in pipeline")]
    Cycle,
}

/// Runtime settings section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterSettings {
    #[serde(default)]
    pub worker_pool_size: usize,
    #[serde(default, with = "humantime_serde")]
    pub default_timeout: Option<Duration>,
}

/// Retry options for one agent binding.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default)]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffStrategy,
}

/// Breaker options for one agent binding.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    #[serde(default, with = "humantime_serde")]
    pub reset_timeout: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub probe_timeout: Option<Duration>,
}

/// One agent registration entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentBinding {
    pub id: String,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub circuit_breaker: Option<BreakerSettings>,
}

/// One node in the pipeline DAG.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineStep {
    pub step: String,
    #[serde(default)]
    pub depends_on: Option<String>,
}

/// Top-level manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub router: RouterSettings,
    pub agents: Vec<AgentBinding>,
    pub pipeline: Vec<PipelineStep>,
}

impl Manifest {
    /// Parses and validates a YAML manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let manifest: Manifest =
            serde_yaml::from_str(&raw).map_err(|source| ManifestError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Enforces structural correctness before runtime.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.agents.is_empty() {
            return Err(ManifestError::EmptyAgents);
        }
        if self.pipeline.is_empty() {
            return Err(ManifestError::EmptyPipeline);
        }

        let mut agents: HashSet<&str> = HashSet::with_capacity(self.agents.len());
        for binding in &self.agents {
            if binding.id.is_empty() {
                return Err(ManifestError::EmptyAgentId);
            }
            if !agents.insert(binding.id.as_str()) {
                return Err(ManifestError::DuplicateAgentId(binding.id.clone()));
            }
        }

        let mut steps: HashSet<&str> = HashSet::with_capacity(self.pipeline.len());
        for entry in &self.pipeline {
            if entry.step.is_empty() {
                return Err(ManifestError::EmptyStep);
            }
            if !steps.insert(entry.step.as_str()) {
                return Err(ManifestError::DuplicateStep(entry.step.clone()));
            }
            if !agents.contains(entry.step.as_str()) {
                return Err(ManifestError::UnboundStep(entry.step.clone()));
            }
        }

        for entry in &self.pipeline {
            let Some(dependency) = entry.depends_on.as_deref() else {
                continue;
            };
            if dependency == entry.step {
                return Err(ManifestError::SelfDependency(entry.step.clone()));
            }
            if !steps.contains(dependency) {
                return Err(ManifestError::UnknownDependency {
                    step: entry.step.clone(),
                    dependency: dependency.to_string(),
                });
            }
        }

        self.ordered_pipeline().map(|_| ())
    }

    /// Topological order of pipeline steps.
    pub fn ordered_pipeline(&self) -> Result<Vec<PipelineStep>, ManifestError> {
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.pipeline.len());
        let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
        for entry in &self.pipeline {
            in_degree.entry(entry.step.as_str()).or_insert(0);
            if let Some(dependency) = entry.depends_on.as_deref() {
                *in_degree.entry(entry.step.as_str()).or_insert(0) += 1;
                children
                    .entry(dependency)
                    .or_default()
                    .push(entry.step.as_str());
            }
        }

        let mut queue: std::collections::VecDeque<&str> = self
            .pipeline
            .iter()
            .filter(|entry| in_degree.get(entry.step.as_str()) == Some(&0))
            .map(|entry| entry.step.as_str())
            .collect();

        let mut ordered_names: Vec<&str> = Vec::with_capacity(self.pipeline.len());
        while let Some(current) = queue.pop_front() {
            ordered_names.push(current);
            for child in children.get(current).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(child);
                    }
                }
            }
        }

        if ordered_names.len() != self.pipeline.len() {
            return Err(ManifestError::Cycle);
        }

        let by_name: HashMap<&str, &PipelineStep> = self
            .pipeline
            .iter()
            .map(|entry| (entry.step.as_str(), entry))
            .collect();
        Ok(ordered_names
            .into_iter()
            .filter_map(|name| by_name.get(name).copied().cloned())
            .collect())
    }

    /// Engine configuration derived from the router section; unset fields
    /// keep the engine defaults.
    pub fn router_config(&self) -> RouterConfig {
        let mut config = RouterConfig::default();
        if self.router.worker_pool_size > 0 {
            config.worker_pool_size = self.router.worker_pool_size;
        }
        if let Some(timeout) = self.router.default_timeout {
            config.default_timeout = timeout;
        }
        config
    }

    /// Converts the pipeline into an execution plan: one invocation per
    /// step, ids `{index:04}_{step}`, request ids `req_{index:04}`, with
    /// the binding's retry and breaker policies attached per node.
    pub fn to_execution_plan(
        &self,
        task_id: impl Into<String>,
        payload: &[u8],
    ) -> Result<ExecutionPlan, ManifestError> {
        let task_id = task_id.into();
        let ordered = self.ordered_pipeline()?;

        let bindings: HashMap<&str, &AgentBinding> = self
            .agents
            .iter()
            .map(|binding| (binding.id.as_str(), binding))
            .collect();
        let invocation_ids: HashMap<&str, String> = ordered
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                (
                    entry.step.as_str(),
                    format!("{:04}_{}", index + 1, entry.step),
                )
            })
            .collect();

        let mut nodes = Vec::with_capacity(ordered.len());
        for (index, entry) in ordered.iter().enumerate() {
            let input = AgentInput::new(
                task_id.clone(),
                format!("req_{:04}", index + 1),
                payload.to_vec(),
            )
            .with_metadata("pipeline_step", entry.step.clone());

            let invocation_id = invocation_ids
                .get(entry.step.as_str())
                .cloned()
                .unwrap_or_default();
            let mut node =
                PlanNode::new(AgentInvocation::new(invocation_id, entry.step.clone(), input));

            if let Some(dependency) = entry.depends_on.as_deref() {
                if let Some(dependency_id) = invocation_ids.get(dependency) {
                    node = node.depends_on(dependency_id.clone());
                }
            }
            if let Some(binding) = bindings.get(entry.step.as_str()) {
                if binding.retry.max_attempts > 0 {
                    node = node.with_retry(
                        RetryPolicy::new(binding.retry.max_attempts)
                            .with_backoff(binding.retry.backoff),
                    );
                }
                if let Some(breaker) = &binding.circuit_breaker {
                    let mut policy = CircuitBreakerPolicy::new(
                        breaker.failure_threshold,
                        breaker.reset_timeout.unwrap_or(Duration::from_secs(60)),
                    );
                    if let Some(probe) = breaker.probe_timeout {
                        policy = policy.with_probe_timeout(probe);
                    }
                    node = node.with_circuit_breaker(policy);
                }
            }
            nodes.push(node);
        }

        Ok(ExecutionPlan::new(task_id, nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
router:
  worker_pool_size: 4
  default_timeout: 5s
agents:
  - id: summarize_agent
    retry:
      max_attempts: 2
      backoff: exponential
    circuit_breaker:
      failure_threshold: 3
      reset_timeout: 30s
      probe_timeout: 2s
  - id: classify_agent
    retry:
      max_attempts: 1
      backoff: linear
pipeline:
  - step: summarize_agent
  - step: classify_agent
    depends_on: summarize_agent
"#;

    fn manifest(raw: &str) -> Manifest {
        serde_yaml::from_str(raw).unwrap()
    }

    #[test]
    fn parses_and_validates_a_full_manifest() {
        let parsed = manifest(MANIFEST);
        parsed.validate().unwrap();

        assert_eq!(parsed.router.worker_pool_size, 4);
        assert_eq!(parsed.router.default_timeout, Some(Duration::from_secs(5)));
        assert_eq!(parsed.agents[0].retry.backoff, BackoffStrategy::Exponential);
        let breaker = parsed.agents[0].circuit_breaker.as_ref().unwrap();
        assert_eq!(breaker.failure_threshold, 3);
        assert_eq!(breaker.probe_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn ordered_pipeline_respects_dependencies() {
        let parsed = manifest(MANIFEST);
        let ordered = parsed.ordered_pipeline().unwrap();
        let names: Vec<&str> = ordered.iter().map(|entry| entry.step.as_str()).collect();
        assert_eq!(names, vec!["summarize_agent", "classify_agent"]);
    }

    #[test]
    fn to_execution_plan_builds_ids_and_policies() {
        let parsed = manifest(MANIFEST);
        let plan = parsed.to_execution_plan("task_demo", b"{}").unwrap();

        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.nodes[0].invocation.id, "0001_summarize_agent");
        assert_eq!(plan.nodes[1].invocation.id, "0002_classify_agent");
        assert_eq!(
            plan.nodes[1].depends_on,
            vec!["0001_summarize_agent".to_string()]
        );
        assert_eq!(plan.nodes[0].retry.as_ref().unwrap().max_attempts, 2);
        assert_eq!(
            plan.nodes[0]
                .circuit_breaker
                .as_ref()
                .unwrap()
                .failure_threshold,
            3
        );
        assert_eq!(plan.nodes[0].invocation.input.request_id, "req_0001");
        assert_eq!(
            plan.nodes[0].invocation.input.metadata["pipeline_step"],
            "summarize_agent"
        );
    }

    #[test]
    fn empty_sections_are_rejected() {
        let no_agents = manifest("agents: []\npipeline:\n  - step: a\n");
        assert!(matches!(
            no_agents.validate().unwrap_err(),
            ManifestError::EmptyAgents
        ));

        let no_pipeline = manifest("agents:\n  - id: a\npipeline: []\n");
        assert!(matches!(
            no_pipeline.validate().unwrap_err(),
            ManifestError::EmptyPipeline
        ));
    }

    #[test]
    fn unbound_step_is_rejected() {
        let parsed = manifest("agents:\n  - id: a\npipeline:\n  - step: ghost\n");
        assert!(matches!(
            parsed.validate().unwrap_err(),
            ManifestError::UnboundStep(step) if step == "ghost"
        ));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let parsed = manifest(
            "agents:\n  - id: a\npipeline:\n  - step: a\n    depends_on: a\n",
        );
        assert!(matches!(
            parsed.validate().unwrap_err(),
            ManifestError::SelfDependency(step) if step == "a"
        ));
    }

    #[test]
    fn dependency_cycle_is_rejected() {
        let parsed = manifest(
            "agents:\n  - id: a\n  - id: b\npipeline:\n  - step: a\n    depends_on: b\n  - step: b\n    depends_on: a\n",
        );
        assert!(matches!(
            parsed.validate().unwrap_err(),
            ManifestError::Cycle
        ));
    }

    #[test]
    fn duplicate_step_is_rejected() {
        let parsed = manifest("agents:\n  - id: a\npipeline:\n  - step: a\n  - step: a\n");
        assert!(matches!(
            parsed.validate().unwrap_err(),
            ManifestError::DuplicateStep(step) if step == "a"
        ));
    }
}
