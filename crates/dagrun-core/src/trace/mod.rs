//! Execution traces: the replayable record of a run.
//!
//! Every attempt of every invocation lands in the trace as one
//! [`TraceStep`]; synthetic engine events (plan validation failures,
//! circuit short-circuits, dependency skips) carry `attempt = 0`. A
//! finalized trace orders steps canonically (ascending invocation id,
//! then attempt, then request id), which makes the record a deterministic
//! function of the run regardless of worker interleaving.

mod io;
mod recorder;
mod replay;

pub use io::{load_from_file, save_to_file, TraceIoError};
pub use recorder::TraceRecorder;
pub use replay::{
    compare, format_divergences, replay_and_compare, AgentResolver, Divergence, ReplayError,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::Duration;

use crate::agent::{AgentInput, AgentOutput};
use crate::wire;

/// One recorded attempt (or synthetic event) of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceStep {
    #[serde(rename = "InvocationID")]
    pub invocation_id: String,
    #[serde(rename = "AgentID")]
    pub agent_id: String,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Input")]
    pub input: AgentInput,
    #[serde(rename = "Output")]
    pub output: AgentOutput,
    /// Empty string means the attempt succeeded.
    #[serde(rename = "Error", default)]
    pub error: String,
    #[serde(rename = "Duration", with = "wire::duration_ns")]
    pub duration: Duration,
    /// 1-based attempt number; 0 marks a step the engine synthesized
    /// without invoking the agent.
    #[serde(rename = "Attempt")]
    pub attempt: u32,
}

impl TraceStep {
    pub fn succeeded(&self) -> bool {
        self.error.is_empty()
    }

    pub(crate) fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.invocation_id
            .cmp(&other.invocation_id)
            .then_with(|| self.attempt.cmp(&other.attempt))
            .then_with(|| self.request_id.cmp(&other.request_id))
    }
}

/// The full record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrace {
    #[serde(rename = "TaskID")]
    pub task_id: String,
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "EndTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "TotalLatency", with = "wire::duration_ns")]
    pub total_latency: Duration,
    #[serde(rename = "Steps", default)]
    pub steps: Vec<TraceStep>,
}

impl ExecutionTrace {
    /// Steps belonging to `invocation_id`, in stored order.
    pub fn steps_for(&self, invocation_id: &str) -> impl Iterator<Item = &TraceStep> {
        self.steps
            .iter()
            .filter(move |step| step.invocation_id == invocation_id)
    }
}
