//! The universal agent contract.
//!
//! Every agent, whether an LLM adapter, a shell tool, or an in-process
//! function, implements [`AgentHandler`]: it receives an [`AgentInput`]
//! and produces an [`AgentOutput`] or an [`AgentError`]. Closures get a
//! blanket impl, so `registry.register("echo", |input| async move { .. })`
//! just works.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::AgentError;
use crate::wire;

/// Request payload for one agent invocation.
///
/// Inputs are treated as read-only by the engine; metadata uses a
/// `BTreeMap` so serialized form is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInput {
    #[serde(rename = "TaskID")]
    pub task_id: String,
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Payload", with = "wire::base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(rename = "Metadata", default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl AgentInput {
    pub fn new(
        task_id: impl Into<String>,
        request_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            request_id: request_id.into(),
            payload: payload.into(),
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Default for AgentInput {
    fn default() -> Self {
        Self {
            task_id: String::new(),
            request_id: String::new(),
            payload: Vec::new(),
            metadata: BTreeMap::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Response payload from an agent invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    #[serde(rename = "RequestID")]
    pub request_id: String,
    #[serde(rename = "Payload", with = "wire::base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(rename = "Metadata", default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(rename = "Duration", with = "wire::duration_ns")]
    pub duration: Duration,
}

impl AgentOutput {
    pub fn new(request_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            request_id: request_id.into(),
            payload: payload.into(),
            metadata: BTreeMap::new(),
            duration: Duration::ZERO,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Contract implemented by every agent.
///
/// Handlers must be cancellation-friendly: the engine drops or aborts the
/// in-flight future on per-attempt timeout and on run cancellation, so any
/// `.await` inside the handler is a prompt cancellation point.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn handle(&self, input: AgentInput) -> Result<AgentOutput, AgentError>;
}

#[async_trait]
impl<F, Fut> AgentHandler for F
where
    F: Fn(AgentInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<AgentOutput, AgentError>> + Send,
{
    async fn handle(&self, input: AgentInput) -> Result<AgentOutput, AgentError> {
        (self)(input).await
    }
}

/// Runs one handler call on its own task with a deadline, converting panics
/// and timeouts into [`AgentError`] values.
///
/// The spawned task is aborted when the deadline fires or `cancel` trips, so
/// a stuck agent cannot outlive its attempt.
pub(crate) async fn invoke_guarded(
    handler: Arc<dyn AgentHandler>,
    input: AgentInput,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<AgentOutput, AgentError> {
    let mut task: JoinHandle<Result<AgentOutput, AgentError>> =
        tokio::spawn(async move { handler.handle(input).await });

    tokio::select! {
        _ = cancel.cancelled() => {
            task.abort();
            Err(AgentError::Cancelled)
        }
        joined = tokio::time::timeout(deadline, &mut task) => match joined {
            Err(_elapsed) => {
                task.abort();
                Err(AgentError::Timeout)
            }
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                if join_err.is_panic() {
                    Err(AgentError::Panic(panic_message(join_err.into_panic())))
                } else {
                    Err(AgentError::Cancelled)
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo() -> Arc<dyn AgentHandler> {
        Arc::new(|input: AgentInput| async move {
            Ok(AgentOutput::new(input.request_id.clone(), input.payload))
        })
    }

    #[tokio::test]
    async fn closure_handlers_satisfy_the_contract() {
        let handler = echo();
        let out = handler
            .handle(AgentInput::new("t1", "r1", b"hello".to_vec()))
            .await
            .unwrap();
        assert_eq!(out.request_id, "r1");
        assert_eq!(out.payload, b"hello");
    }

    #[tokio::test]
    async fn guarded_call_converts_panics() {
        let handler: Arc<dyn AgentHandler> =
            Arc::new(|_input: AgentInput| async move { panic!("kaboom") });
        let err = invoke_guarded(
            handler,
            AgentInput::default(),
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Panic(_)));
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn guarded_call_enforces_the_deadline() {
        let handler: Arc<dyn AgentHandler> = Arc::new(|_input: AgentInput| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AgentOutput::default())
        });
        let err = invoke_guarded(
            handler,
            AgentInput::default(),
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err, AgentError::Timeout);
    }

    #[tokio::test]
    async fn guarded_call_honors_cancellation() {
        let handler: Arc<dyn AgentHandler> = Arc::new(|_input: AgentInput| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(AgentOutput::default())
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = invoke_guarded(
            handler,
            AgentInput::default(),
            Duration::from_secs(30),
            &cancel,
        )
        .await
        .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
    }
}
