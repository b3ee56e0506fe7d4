//! Node Invokers - capability registry `{kind → executor}`
//!
//! The engine is agnostic to what a node does; dispatch goes through this
//! registry. Agent and tool invokers call the external adapters; control,
//! aggregation and sub-workflow nodes are steered by the engine itself.
//!
//! `invoke_with_deadline` enforces `timeout_ms` independently of the
//! executor by racing it against a deadline timer and the cancellation
//! token. `timeout_ms = 0` is an immediate timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::adapter::{AgentAdapter, AgentRequest, ToolAdapter};
use crate::ast::{NodeDef, NodeKind};
use crate::error::{Result, StrandError};

/// One node invocation, as seen by an executor
pub struct InvokeRequest<'a> {
    pub node: &'a NodeDef,
    pub input: Value,
    pub cancel: &'a CancellationToken,
    pub deadline: Option<Instant>,
}

/// A capability executor for one node kind
#[async_trait]
pub trait NodeInvoker: Send + Sync {
    async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value>;
}

/// Agent nodes: forward to the agent adapter
pub struct AgentInvoker {
    adapter: Arc<dyn AgentAdapter>,
}

impl AgentInvoker {
    pub fn new(adapter: Arc<dyn AgentAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl NodeInvoker for AgentInvoker {
    async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value> {
        let NodeKind::Agent { agent } = &request.node.kind else {
            return Err(StrandError::Internal {
                reason: format!("agent invoker got node '{}' of wrong kind", request.node.id),
            });
        };
        let response = self
            .adapter
            .invoke(
                AgentRequest {
                    agent_id: agent.agent_id.clone(),
                    input: request.input,
                    options: agent.options.clone(),
                },
                request.cancel,
                request.deadline,
            )
            .await?;
        debug!(node_id = %request.node.id, trace_id = %response.trace_id, "agent responded");
        Ok(response.output)
    }
}

/// Tool nodes: forward to the tool adapter
pub struct ToolInvoker {
    adapter: Arc<dyn ToolAdapter>,
}

impl ToolInvoker {
    pub fn new(adapter: Arc<dyn ToolAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl NodeInvoker for ToolInvoker {
    async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value> {
        let NodeKind::Tool { tool } = &request.node.kind else {
            return Err(StrandError::Internal {
                reason: format!("tool invoker got node '{}' of wrong kind", request.node.id),
            });
        };
        self.adapter
            .invoke(
                &tool.tool_id,
                request.input,
                request.cancel,
                request.deadline,
            )
            .await
    }
}

/// `{kind → executor}` registry; extensible with custom kinds
pub struct InvokerRegistry {
    invokers: FxHashMap<&'static str, Arc<dyn NodeInvoker>>,
}

impl InvokerRegistry {
    /// Standard registry over the two external adapters
    pub fn new(agent: Arc<dyn AgentAdapter>, tool: Arc<dyn ToolAdapter>) -> Self {
        let mut invokers: FxHashMap<&'static str, Arc<dyn NodeInvoker>> = FxHashMap::default();
        invokers.insert("agent", Arc::new(AgentInvoker::new(agent)) as Arc<dyn NodeInvoker>);
        invokers.insert("tool", Arc::new(ToolInvoker::new(tool)) as Arc<dyn NodeInvoker>);
        Self { invokers }
    }

    pub fn register(&mut self, kind: &'static str, invoker: Arc<dyn NodeInvoker>) {
        self.invokers.insert(kind, invoker);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeInvoker>> {
        self.invokers.get(kind).map(Arc::clone)
    }
}

/// Race an invoker against the node's deadline and the cancellation
/// token. The timeout is enforced here regardless of whether the
/// executor honors it.
pub async fn invoke_with_deadline(
    invoker: &Arc<dyn NodeInvoker>,
    node: &NodeDef,
    input: Value,
    cancel: &CancellationToken,
    timeout_ms: Option<u64>,
) -> Result<Value> {
    if timeout_ms == Some(0) {
        return Err(StrandError::Timeout {
            node_id: node.id.clone(),
            timeout_ms: 0,
        });
    }

    let deadline = timeout_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let request = InvokeRequest {
        node,
        input,
        cancel,
        deadline,
    };

    match deadline {
        Some(deadline) => {
            tokio::select! {
                result = invoker.invoke(request) => result,
                _ = tokio::time::sleep_until(deadline.into()) => Err(StrandError::Timeout {
                    node_id: node.id.clone(),
                    timeout_ms: timeout_ms.unwrap_or(0),
                }),
                _ = cancel.cancelled() => Err(StrandError::Cancelled {
                    node_id: Some(node.id.clone()),
                }),
            }
        }
        None => {
            tokio::select! {
                result = invoker.invoke(request) => result,
                _ = cancel.cancelled() => Err(StrandError::Cancelled {
                    node_id: Some(node.id.clone()),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{MockAgentAdapter, MockToolAdapter};
    use serde_json::json;

    fn tool_node(id: &str, tool_id: &str) -> NodeDef {
        serde_yaml::from_str(&format!(
            r#"
id: {id}
type: tool
tool_id: {tool_id}
"#
        ))
        .unwrap()
    }

    fn agent_node(id: &str, agent_id: &str) -> NodeDef {
        serde_yaml::from_str(&format!(
            r#"
id: {id}
type: agent
agent_id: {agent_id}
"#
        ))
        .unwrap()
    }

    fn registry(tool: Arc<MockToolAdapter>) -> InvokerRegistry {
        InvokerRegistry::new(Arc::new(MockAgentAdapter::new()), tool)
    }

    #[tokio::test]
    async fn tool_dispatch_through_registry() {
        let tool = Arc::new(MockToolAdapter::new());
        tool.register("inc", |params| {
            Ok(json!({"out": params["in"].as_i64().unwrap_or(0) + 1}))
        });
        let registry = registry(tool);

        let node = tool_node("step", "inc");
        let invoker = registry.get("tool").unwrap();
        let out = invoke_with_deadline(
            &invoker,
            &node,
            json!({"in": 41}),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"out": 42}));
    }

    #[tokio::test]
    async fn agent_dispatch_through_registry() {
        let agent = Arc::new(MockAgentAdapter::new());
        let registry = InvokerRegistry::new(agent, Arc::new(MockToolAdapter::new()));

        let node = agent_node("ask", "assistant");
        let invoker = registry.get("agent").unwrap();
        let out = invoke_with_deadline(
            &invoker,
            &node,
            json!({"q": "hi"}),
            &CancellationToken::new(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(out["echo"]["q"], "hi");
    }

    #[tokio::test]
    async fn zero_timeout_is_immediate_timeout() {
        let tool = Arc::new(MockToolAdapter::new());
        tool.register("t", |_| Ok(json!(1)));
        let registry = registry(tool);

        let node = tool_node("n", "t");
        let invoker = registry.get("tool").unwrap();
        let err = invoke_with_deadline(&invoker, &node, json!({}), &CancellationToken::new(), Some(0))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("STRAND-050"));
    }

    #[tokio::test]
    async fn deadline_beats_slow_executor() {
        let tool = Arc::new(MockToolAdapter::new());
        tool.register("slow", |_| Ok(json!("late")));
        tool.set_latency("slow", Duration::from_secs(5));
        let registry = registry(tool);

        let node = tool_node("n", "slow");
        let invoker = registry.get("tool").unwrap();
        let start = Instant::now();
        let err =
            invoke_with_deadline(&invoker, &node, json!({}), &CancellationToken::new(), Some(30))
                .await
                .unwrap_err();
        assert!(matches!(err, StrandError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_beats_slow_executor() {
        let tool = Arc::new(MockToolAdapter::new());
        tool.register("slow", |_| Ok(json!("late")));
        tool.set_latency("slow", Duration::from_secs(5));
        let registry = registry(tool);

        let node = tool_node("n", "slow");
        let invoker = registry.get("tool").unwrap();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel2.cancel();
        });
        let err = invoke_with_deadline(&invoker, &node, json!({}), &cancel, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StrandError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn unknown_kind_is_absent_from_registry() {
        let registry = registry(Arc::new(MockToolAdapter::new()));
        assert!(registry.get("control").is_none());
        assert!(registry.get("tool").is_some());
    }
}
