//! Tool Adapter - seam to the tool-call executors
//!
//! Tools (HTTP, email, database, ...) live outside the core. The mock
//! adapter maps tool ids to closures and supports scripted failures and
//! injected latency for resilience tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StrandError};

/// The tool-invocation seam. Implementations must observe the
/// cancellation token and the deadline and return promptly.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    async fn invoke(
        &self,
        tool_id: &str,
        params: Value,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<Value>;
}

/// Synchronous tool body: params in, value out
pub type ToolFn = Arc<dyn Fn(Value) -> Result<Value> + Send + Sync>;

/// In-process tool adapter mapping ids to closures
#[derive(Default)]
pub struct MockToolAdapter {
    tools: DashMap<String, ToolFn>,
    latency: DashMap<String, Duration>,
    failures: DashMap<String, Mutex<VecDeque<(String, bool)>>>,
    calls: DashMap<String, u32>,
}

impl MockToolAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool body
    pub fn register<F>(&self, tool_id: &str, body: F)
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.tools.insert(tool_id.to_string(), Arc::new(body));
    }

    /// Queue a scripted failure for the next call: `(reason, retryable)`
    pub fn fail_next(&self, tool_id: &str, reason: &str, retryable: bool) {
        self.failures
            .entry(tool_id.to_string())
            .or_default()
            .lock()
            .push_back((reason.to_string(), retryable));
    }

    /// Inject fixed latency before every call to `tool_id`
    pub fn set_latency(&self, tool_id: &str, latency: Duration) {
        self.latency.insert(tool_id.to_string(), latency);
    }

    /// Calls observed for `tool_id` (scripted failures count; rejected
    /// calls that never reach the adapter do not)
    pub fn call_count(&self, tool_id: &str) -> u32 {
        self.calls.get(tool_id).map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl ToolAdapter for MockToolAdapter {
    async fn invoke(
        &self,
        tool_id: &str,
        params: Value,
        cancel: &CancellationToken,
        _deadline: Option<Instant>,
    ) -> Result<Value> {
        *self.calls.entry(tool_id.to_string()).or_insert(0) += 1;

        if let Some(latency) = self.latency.get(tool_id).map(|d| *d) {
            tokio::select! {
                _ = tokio::time::sleep(latency) => {}
                _ = cancel.cancelled() => {
                    return Err(StrandError::Cancelled { node_id: None });
                }
            }
        }

        if let Some(scripted) = self
            .failures
            .get(tool_id)
            .and_then(|s| s.lock().pop_front())
        {
            let (reason, retryable) = scripted;
            return Err(StrandError::Tool {
                tool_id: tool_id.to_string(),
                reason,
                retryable,
            });
        }

        let body = self
            .tools
            .get(tool_id)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| StrandError::ToolNotFound {
                tool_id: tool_id.to_string(),
            })?;

        body(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_tool_runs() {
        let mock = MockToolAdapter::new();
        mock.register("inc", |params| {
            let n = params["in"].as_i64().unwrap_or(0);
            Ok(json!({ "out": n + 1 }))
        });

        let out = mock
            .invoke("inc", json!({"in": 2}), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(out, json!({"out": 3}));
        assert_eq!(mock.call_count("inc"), 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_error() {
        let mock = MockToolAdapter::new();
        let err = mock
            .invoke("ghost", json!({}), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("STRAND-071"));
    }

    #[tokio::test]
    async fn scripted_failures_take_priority() {
        let mock = MockToolAdapter::new();
        mock.register("flaky", |_| Ok(json!("ok")));
        mock.fail_next("flaky", "boom", true);

        let err = mock
            .invoke("flaky", json!({}), &CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        let ok = mock
            .invoke("flaky", json!({}), &CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(ok, json!("ok"));
        assert_eq!(mock.call_count("flaky"), 2);
    }

    #[tokio::test]
    async fn cancellation_interrupts_latency() {
        let mock = MockToolAdapter::new();
        mock.register("slow", |_| Ok(json!("late")));
        mock.set_latency("slow", Duration::from_secs(5));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = mock
            .invoke("slow", json!({}), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::Cancelled { .. }));
    }
}
