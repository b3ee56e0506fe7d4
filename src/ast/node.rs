//! Node Types - the units of work
//!
//! A node is tagged by `type`:
//! - `agent`: call an AI agent through the agent adapter
//! - `tool`: invoke a tool through the tool adapter
//! - `control`: steer execution (switch/parallel/loop/join)
//! - `aggregation`: reduce declared upstream outputs
//! - `sub_workflow`: run a nested execution

use rustc_hash::FxHashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workflow::Backoff;
use crate::error::ErrorKind;

/// A single unit of work in a DAG workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique within the workflow
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Node ids that must reach a terminal state before this node is ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Input bindings: alias → template (`${path}` expressions)
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub inputs: FxHashMap<String, String>,
    /// Scheduling priority (higher runs first, default 0)
    #[serde(default, skip_serializing_if = "is_zero")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicyDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Compensating action recorded when this node commits `success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationDef>,
}

fn is_zero(v: &i32) -> bool {
    *v == 0
}

impl NodeDef {
    /// Kind name used for per-kind concurrency caps and dispatch
    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Node payload, internally tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Agent {
        #[serde(flatten)]
        agent: AgentNodeConfig,
    },
    Tool {
        #[serde(flatten)]
        tool: ToolNodeConfig,
    },
    Control {
        #[serde(flatten)]
        control: ControlConfig,
    },
    Aggregation {
        #[serde(flatten)]
        aggregation: AggregationConfig,
    },
    SubWorkflow {
        #[serde(flatten)]
        sub: SubWorkflowConfig,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Agent { .. } => "agent",
            Self::Tool { .. } => "tool",
            Self::Control { .. } => "control",
            Self::Aggregation { .. } => "aggregation",
            Self::SubWorkflow { .. } => "sub_workflow",
        }
    }
}

/// Agent node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentNodeConfig {
    pub agent_id: String,
    /// Provider-specific options forwarded to the adapter
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub options: Value,
}

/// Tool node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolNodeConfig {
    pub tool_id: String,
}

/// Control node subkind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Switch,
    Parallel,
    Loop,
    Join,
}

/// One arm of a switch node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Condition expression evaluated against the context snapshot
    pub when: String,
    /// Head node of the branch this case activates
    pub branch: String,
}

/// Join wait mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    WaitAll,
    WaitAny,
}

/// Loop termination subkind. Required in the declaration; a loop without
/// an explicit kind fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopKind {
    While,
    ForEach,
    Count,
}

/// Loop region declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub kind: LoopKind,
    /// `while`: condition re-evaluated before every iteration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// `for_each`: template resolving to an array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<String>,
    /// Binding name for the current item (default `item`)
    #[serde(default = "default_item_var")]
    pub item_var: String,
    /// `count`: fixed number of iterations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    /// Node ids forming the loop body subgraph
    pub body: Vec<String>,
    /// Hard bound on iterations (guards `while` loops)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
}

fn default_item_var() -> String {
    "item".to_string()
}

fn default_max_iterations() -> u64 {
    1_000
}

/// Control node configuration (fields used depend on `subtype`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlConfig {
    pub subtype: ControlKind,
    /// switch: ordered cases, first whose condition holds wins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cases: Vec<SwitchCase>,
    /// switch: branch taken when no case matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    /// join: wait mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinMode>,
    /// join: the watched node set (default: the node's dependencies)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join_on: Vec<String>,
    /// loop: region declaration
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub loop_spec: Option<LoopSpec>,
}

/// Aggregation reducer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    /// Collect outputs into an array (arrays are flattened)
    Concat,
    /// Merge object outputs key-by-key (later sources win)
    Merge,
    /// Sum numeric outputs
    Sum,
    /// Output of the last-listed source
    Last,
}

/// Aggregation node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Upstream node ids whose outputs are reduced, in declaration order
    pub sources: Vec<String>,
    pub reducer: Reducer,
}

/// Nested workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubWorkflowConfig {
    pub workflow: String,
    #[serde(default = "default_sub_version")]
    pub workflow_version: String,
}

fn default_sub_version() -> String {
    "1".to_string()
}

/// Node-local retry policy. Takes precedence over global error handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyDef {
    /// Total attempts including the first (0 and 1 both mean "no retry")
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Jitter factor (0.0..=1.0) multiplying delays by 1 ± j
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<f64>,
    /// Restrict retries to these kinds; empty = any retryable error
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retryable_errors: Vec<ErrorKind>,
}

fn default_base_delay() -> u64 {
    100
}

fn default_max_delay() -> u64 {
    10_000
}

/// Compensating action bound to a node: a tool call whose params are
/// resolved when the node's `success` commits and replayed at rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationDef {
    pub tool_id: String,
    #[serde(default, skip_serializing_if = "FxHashMap::is_empty")]
    pub input: FxHashMap<String, String>,
}
