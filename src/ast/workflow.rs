//! Workflow Types - main workflow structure
//!
//! Contains the core document types:
//! - `WorkflowDoc`: root document with the `workflow:` key
//! - `WorkflowDef`: workflow with nodes, edges and handlers
//! - `EdgeDef`: DAG edge (data/control/conditional)
//! - `ErrorHandlerDef` / `PolicyDef`: global failure policies
//! - `CompensationPlanDef`: Saga rollback configuration

use rustc_hash::FxHashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorKind;

use super::node::{NodeDef, RetryPolicyDef};
use super::state::StateDef;

/// Root of a workflow document (YAML or JSON)
///
/// # Example
///
/// ```yaml
/// workflow:
///   name: summarize
///   version: "1"
///   type: dag
///   nodes:
///     - id: fetch
///       type: tool
///       tool_id: http_get
///     - id: summarize
///       type: agent
///       agent_id: summarizer
///       dependencies: [fetch]
///       inputs:
///         text: "${nodes.fetch.output.body}"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDoc {
    pub workflow: WorkflowDef,
}

/// Workflow topology kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    #[default]
    Dag,
    StateMachine,
    /// Parsed but rejected by validation: interaction semantics between the
    /// two engines are undefined.
    Hybrid,
}

/// Declarative workflow definition (immutable once compiled)
///
/// A `(name, version)` pair is unique within a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(rename = "type", default)]
    pub kind: WorkflowKind,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_handlers: Vec<ErrorHandlerDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationPlanDef>,
    /// State machine: name of the single initial state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_state: Option<String>,
    /// State machine: declared states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<StateDef>,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub metadata: FxHashMap<String, Value>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDef {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up a state by name
    pub fn state(&self, name: &str) -> Option<&StateDef> {
        self.states.iter().find(|s| s.name == name)
    }
}

/// Edge kind between nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    #[default]
    Data,
    Control,
    Conditional,
}

/// DAG edge. Edges may be omitted when `dependencies` suffice; a
/// conditional edge carries an activation condition evaluated when the
/// source completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: EdgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_mapping: Option<FxHashMap<String, String>>,
}

/// Backoff strategy for retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    Linear,
    Exponential,
}

/// Global error handler entry. Matching is first-match-wins; a node-local
/// retry policy takes precedence when both apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlerDef {
    /// Regex on node id; absent = match every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<String>,
    /// Error kinds this handler applies to; empty = all kinds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorKind>,
    pub policy: PolicyDef,
}

/// Failure policy outcome
///
/// # Example
///
/// ```yaml
/// error_handlers:
///   - nodes: "fetch_.*"
///     errors: [timeout, tool]
///     policy:
///       retry: { max_attempts: 3, backoff: exponential, base_delay_ms: 100 }
///   - policy: escalate
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDef {
    Retry(RetryPolicyDef),
    Skip {
        #[serde(default)]
        output: Value,
    },
    Fallback {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    Compensate,
    Escalate,
}

/// Compensation run strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationStrategy {
    #[default]
    SequentialReverse,
    Parallel,
    CustomPlan,
}

/// Workflow-level Saga configuration. Presence of the plan enables
/// compensation for the execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationPlanDef {
    #[serde(default)]
    pub strategy: CompensationStrategy,
    /// Node order for `custom_plan`; ignored otherwise
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_order: Vec<String>,
    /// Per-entry timeout
    #[serde(default = "default_entry_timeout")]
    pub entry_timeout_ms: u64,
    /// Best-effort retries per entry
    #[serde(default)]
    pub retry_budget: u32,
    /// Log-and-proceed vs stop-and-surface on entry failure
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_entry_timeout() -> u64 {
    5_000
}

impl Default for CompensationPlanDef {
    fn default() -> Self {
        Self {
            strategy: CompensationStrategy::default(),
            custom_order: Vec::new(),
            entry_timeout_ms: default_entry_timeout(),
            retry_budget: 0,
            continue_on_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_dag_document() {
        let yaml = r#"
workflow:
  name: hello
  nodes:
    - id: greet
      type: tool
      tool_id: echo
"#;
        let doc: WorkflowDoc = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.workflow.name, "hello");
        assert_eq!(doc.workflow.version, "1");
        assert_eq!(doc.workflow.kind, WorkflowKind::Dag);
        assert_eq!(doc.workflow.nodes.len(), 1);
    }

    #[test]
    fn parse_edge_defaults_to_data_kind() {
        let yaml = r#"
from: a
to: b
"#;
        let edge: EdgeDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(edge.kind, EdgeKind::Data);
        assert!(edge.condition.is_none());
    }

    #[test]
    fn parse_conditional_edge() {
        let yaml = r#"
from: check
to: notify
kind: conditional
condition: "${nodes.check.output.level} == 'high'"
"#;
        let edge: EdgeDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(edge.kind, EdgeKind::Conditional);
        assert!(edge.condition.is_some());
    }

    #[test]
    fn parse_error_handler_with_retry_policy() {
        let yaml = r#"
nodes: "fetch_.*"
errors: [timeout, tool]
policy:
  retry:
    max_attempts: 3
    backoff: exponential
    base_delay_ms: 50
"#;
        let handler: ErrorHandlerDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(handler.errors.len(), 2);
        match handler.policy {
            PolicyDef::Retry(ref r) => {
                assert_eq!(r.max_attempts, 3);
                assert_eq!(r.backoff, Backoff::Exponential);
            }
            _ => panic!("expected retry policy"),
        }
    }

    #[test]
    fn parse_escalate_policy_as_bare_string() {
        let yaml = "policy: escalate";
        #[derive(Deserialize)]
        struct Wrap {
            policy: PolicyDef,
        }
        let w: Wrap = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(w.policy, PolicyDef::Escalate);
    }

    #[test]
    fn workflow_roundtrips_through_yaml() {
        let yaml = r#"
workflow:
  name: pipeline
  version: "2"
  type: dag
  nodes:
    - id: a
      type: tool
      tool_id: step
    - id: b
      type: tool
      tool_id: step
      dependencies: [a]
  compensation:
    strategy: sequential_reverse
    continue_on_error: true
"#;
        let doc: WorkflowDoc = serde_yaml::from_str(yaml).unwrap();
        let serialized = serde_yaml::to_string(&doc).unwrap();
        let reparsed: WorkflowDoc = serde_yaml::from_str(&serialized).unwrap();
        assert_eq!(doc, reparsed);
    }
}
