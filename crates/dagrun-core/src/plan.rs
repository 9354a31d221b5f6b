//! Execution plans and the validated dependency graph.
//!
//! A plan is a flat list of nodes with dependency edges by invocation id.
//! [`PlanGraph::build`] validates the structure (unique non-empty ids,
//! known dependencies, no self-loops, acyclic) and lays the nodes out in
//! topological levels via Kahn's algorithm: level 0 holds every node with
//! in-degree 0, level k+1 every node whose remaining in-degree reaches 0
//! once level k is removed. Ids within a level are sorted so scheduling and
//! trace emission stay deterministic.

use std::collections::HashMap;
use thiserror::Error;

use crate::agent::AgentInput;
use crate::circuit_breaker::CircuitBreakerPolicy;
use crate::retry::RetryPolicy;

/// One scheduled agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentInvocation {
    /// Unique within the plan.
    pub id: String,
    pub agent_id: String,
    pub input: AgentInput,
}

impl AgentInvocation {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, input: AgentInput) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            input,
        }
    }
}

/// A plan entry: the invocation, its upstream edges, and optional policy
/// overrides. `None` policies inherit the engine defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub invocation: AgentInvocation,
    pub depends_on: Vec<String>,
    pub retry: Option<RetryPolicy>,
    pub circuit_breaker: Option<CircuitBreakerPolicy>,
}

impl PlanNode {
    pub fn new(invocation: AgentInvocation) -> Self {
        Self {
            invocation,
            depends_on: Vec::new(),
            retry: None,
            circuit_breaker: None,
        }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_circuit_breaker(mut self, policy: CircuitBreakerPolicy) -> Self {
        self.circuit_breaker = Some(policy);
        self
    }
}

/// Declarative dependency graph handed to the engine.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    pub task_id: String,
    pub nodes: Vec<PlanNode>,
}

impl ExecutionPlan {
    pub fn new(task_id: impl Into<String>, nodes: Vec<PlanNode>) -> Self {
        Self {
            task_id: task_id.into(),
            nodes,
        }
    }
}

/// Structural validation failures, fatal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("plan has no nodes")]
    EmptyPlan,
    #[error("invocation id is empty")]
    EmptyInvocationId,
    #[error("duplicate invocation id: {0}")]
    DuplicateInvocationId(String),
    #[error("invocation {invocation} depends on unknown invocation {dependency}")]
    UnknownDependency {
        invocation: String,
        dependency: String,
    },
    #[error("invocation {0} depends on itself")]
    SelfDependency(String),
    #[error("plan contains a dependency cycle")]
    Cycle,
}

/// Validated plan: owned nodes plus the level ordering the engine
/// schedules against.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    nodes: HashMap<String, PlanNode>,
    levels: Vec<Vec<String>>,
}

impl PlanGraph {
    /// Validates `plan` and computes its topological levels.
    pub fn build(plan: &ExecutionPlan) -> Result<Self, PlanError> {
        if plan.nodes.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut nodes: HashMap<String, PlanNode> = HashMap::with_capacity(plan.nodes.len());
        for node in &plan.nodes {
            let id = &node.invocation.id;
            if id.is_empty() {
                return Err(PlanError::EmptyInvocationId);
            }
            if nodes.contains_key(id) {
                return Err(PlanError::DuplicateInvocationId(id.clone()));
            }
            let mut node = node.clone();
            // Normalized edges keep dependency-failure attribution and
            // in-degree arithmetic deterministic.
            node.depends_on.sort();
            node.depends_on.dedup();
            nodes.insert(id.clone(), node);
        }

        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for node in nodes.values() {
            let id = node.invocation.id.as_str();
            in_degree.entry(id).or_insert(0);
            for dependency in &node.depends_on {
                if dependency == id {
                    return Err(PlanError::SelfDependency(id.to_string()));
                }
                if !nodes.contains_key(dependency) {
                    return Err(PlanError::UnknownDependency {
                        invocation: id.to_string(),
                        dependency: dependency.clone(),
                    });
                }
                *in_degree.entry(id).or_insert(0) += 1;
                dependents.entry(dependency.as_str()).or_default().push(id);
            }
        }

        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable();

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut visited = 0usize;
        while !ready.is_empty() {
            visited += ready.len();
            let mut next: Vec<&str> = Vec::new();
            for id in &ready {
                for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent);
                        }
                    }
                }
            }
            next.sort_unstable();
            levels.push(ready.iter().map(|id| id.to_string()).collect());
            ready = next;
        }

        if visited != nodes.len() {
            return Err(PlanError::Cycle);
        }

        Ok(Self { nodes, levels })
    }

    /// Topological level sets, ids sorted within each level.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn node(&self, invocation_id: &str) -> Option<&PlanNode> {
        self.nodes.get(invocation_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, deps: &[&str]) -> PlanNode {
        let mut node = PlanNode::new(AgentInvocation::new(id, "agent", AgentInput::default()));
        for dep in deps {
            node = node.depends_on(*dep);
        }
        node
    }

    fn plan(nodes: Vec<PlanNode>) -> ExecutionPlan {
        ExecutionPlan::new("task", nodes)
    }

    #[test]
    fn diamond_produces_three_levels() {
        let graph = PlanGraph::build(&plan(vec![
            node("d", &["b", "c"]),
            node("b", &["a"]),
            node("c", &["a"]),
            node("a", &[]),
        ]))
        .unwrap();

        assert_eq!(
            graph.levels(),
            &[
                vec!["a".to_string()],
                vec!["b".to_string(), "c".to_string()],
                vec!["d".to_string()],
            ]
        );
    }

    #[test]
    fn level_ties_break_by_ascending_id() {
        let graph =
            PlanGraph::build(&plan(vec![node("z", &[]), node("m", &[]), node("a", &[])])).unwrap();
        assert_eq!(
            graph.levels(),
            &[vec!["a".to_string(), "m".to_string(), "z".to_string()]]
        );
    }

    #[test]
    fn empty_plan_is_rejected() {
        let err = PlanGraph::build(&plan(vec![])).unwrap_err();
        assert_eq!(err, PlanError::EmptyPlan);
    }

    #[test]
    fn blank_id_is_rejected() {
        let err = PlanGraph::build(&plan(vec![node("", &[])])).unwrap_err();
        assert_eq!(err, PlanError::EmptyInvocationId);
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let err = PlanGraph::build(&plan(vec![node("a", &[]), node("a", &[])])).unwrap_err();
        assert_eq!(err, PlanError::DuplicateInvocationId("a".into()));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let err = PlanGraph::build(&plan(vec![node("a", &["ghost"])])).unwrap_err();
        assert_eq!(
            err,
            PlanError::UnknownDependency {
                invocation: "a".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn self_dependency_is_rejected() {
        let err = PlanGraph::build(&plan(vec![node("a", &["a"])])).unwrap_err();
        assert_eq!(err, PlanError::SelfDependency("a".into()));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = PlanGraph::build(&plan(vec![
            node("a", &["c"]),
            node("b", &["a"]),
            node("c", &["b"]),
        ]))
        .unwrap_err();
        assert_eq!(err, PlanError::Cycle);
    }

    #[test]
    fn duplicate_edges_are_collapsed() {
        let graph =
            PlanGraph::build(&plan(vec![node("a", &[]), node("b", &["a", "a"])])).unwrap();
        assert_eq!(graph.node("b").unwrap().depends_on, vec!["a".to_string()]);
        assert_eq!(graph.levels().len(), 2);
    }
}
