//! Agent Adapter - seam to the agent-invocation back-end
//!
//! The engine is agnostic to providers; it hands an `AgentRequest` plus
//! cancellation token and deadline to whatever implements `AgentAdapter`.
//! `MockAgentAdapter` is the scriptable test double: sequenced outcomes,
//! injected latency, per-agent call counters.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{AgentErrorKind, Result, StrandError};

/// Request handed to the agent back-end
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_id: String,
    pub input: Value,
    /// Provider-specific options from the node config
    pub options: Value,
}

/// Token accounting reported by the back-end, when available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response from the agent back-end
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub output: Value,
    pub usage: Option<AgentUsage>,
    pub trace_id: String,
}

/// The agent-invocation seam. Implementations must observe the
/// cancellation token and the deadline and return promptly.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<AgentResponse>;
}

/// One scripted outcome for the mock
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Succeed(Value),
    Fail(AgentErrorKind, String),
}

/// Scriptable in-process agent adapter.
///
/// Outcomes are consumed in FIFO order per agent id; with no script the
/// mock echoes its input under `{"echo": ...}`.
#[derive(Default)]
pub struct MockAgentAdapter {
    scripts: DashMap<String, Mutex<VecDeque<MockOutcome>>>,
    latency: DashMap<String, Duration>,
    calls: DashMap<String, u32>,
}

impl MockAgentAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an outcome for the next call to `agent_id`
    pub fn script(&self, agent_id: &str, outcome: MockOutcome) {
        self.scripts
            .entry(agent_id.to_string())
            .or_default()
            .lock()
            .push_back(outcome);
    }

    /// Queue `n` failures followed by a success (retry scenarios)
    pub fn fail_times(&self, agent_id: &str, n: usize, kind: AgentErrorKind, then: Value) {
        for _ in 0..n {
            self.script(
                agent_id,
                MockOutcome::Fail(kind, "scripted failure".to_string()),
            );
        }
        self.script(agent_id, MockOutcome::Succeed(then));
    }

    /// Inject fixed latency before every call to `agent_id`
    pub fn set_latency(&self, agent_id: &str, latency: Duration) {
        self.latency.insert(agent_id.to_string(), latency);
    }

    /// Calls observed for `agent_id`
    pub fn call_count(&self, agent_id: &str) -> u32 {
        self.calls.get(agent_id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl AgentAdapter for MockAgentAdapter {
    async fn invoke(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<AgentResponse> {
        *self.calls.entry(request.agent_id.clone()).or_insert(0) += 1;

        if let Some(latency) = self.latency.get(&request.agent_id).map(|d| *d) {
            if let Some(deadline) = deadline {
                if Instant::now() + latency > deadline {
                    return Err(StrandError::Agent {
                        kind: AgentErrorKind::Timeout,
                        agent_id: request.agent_id,
                        reason: "deadline exceeded".to_string(),
                    });
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => {
                    return Err(StrandError::Cancelled { node_id: None });
                }
            }
        }

        let scripted = self
            .scripts
            .get(&request.agent_id)
            .and_then(|s| s.lock().pop_front());

        match scripted {
            Some(MockOutcome::Succeed(output)) => Ok(AgentResponse {
                output,
                usage: Some(AgentUsage {
                    input_tokens: 10,
                    output_tokens: 10,
                }),
                trace_id: Uuid::new_v4().to_string(),
            }),
            Some(MockOutcome::Fail(kind, reason)) => Err(StrandError::Agent {
                kind,
                agent_id: request.agent_id,
                reason,
            }),
            None => Ok(AgentResponse {
                output: json!({ "echo": request.input }),
                usage: None,
                trace_id: Uuid::new_v4().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(agent_id: &str) -> AgentRequest {
        AgentRequest {
            agent_id: agent_id.to_string(),
            input: json!({"q": "hi"}),
            options: Value::Null,
        }
    }

    #[tokio::test]
    async fn unscripted_agent_echoes_input() {
        let mock = MockAgentAdapter::new();
        let response = mock
            .invoke(request("a"), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(response.output["echo"]["q"], "hi");
        assert!(!response.trace_id.is_empty());
        assert_eq!(mock.call_count("a"), 1);
    }

    #[tokio::test]
    async fn scripted_outcomes_run_in_order() {
        let mock = MockAgentAdapter::new();
        mock.fail_times("a", 2, AgentErrorKind::Execution, json!("done"));

        for _ in 0..2 {
            let err = mock
                .invoke(request("a"), &CancellationToken::new(), None)
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
        let ok = mock
            .invoke(request("a"), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(ok.output, json!("done"));
        assert_eq!(mock.call_count("a"), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_latency() {
        let mock = MockAgentAdapter::new();
        mock.set_latency("slow", Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mock
            .invoke(request("slow"), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn deadline_shorter_than_latency_times_out() {
        let mock = MockAgentAdapter::new();
        mock.set_latency("slow", Duration::from_secs(5));

        let deadline = Instant::now() + Duration::from_millis(10);
        let err = mock
            .invoke(request("slow"), &CancellationToken::new(), Some(deadline))
            .await
            .unwrap_err();
        match err {
            StrandError::Agent { kind, .. } => assert_eq!(kind, AgentErrorKind::Timeout),
            other => panic!("expected agent timeout, got {}", other),
        }
    }
}
