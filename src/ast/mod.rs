//! AST Module - declarative workflow definitions
//!
//! YAML/JSON parsed types, the static "what" of a workflow:
//! - `workflow`: WorkflowDoc, WorkflowDef, EdgeDef, ErrorHandlerDef, PolicyDef
//! - `node`: NodeDef with tagged NodeKind (agent/tool/control/aggregation/sub_workflow)
//! - `state`: StateDef, TransitionDef, ActionDef for state-machine workflows
//!
//! For the runtime "how", see the `runtime` and `fsm` modules.

mod node;
mod state;
mod workflow;

pub use node::{
    AggregationConfig, AgentNodeConfig, CompensationDef, ControlConfig, ControlKind, JoinMode,
    LoopKind, LoopSpec, NodeDef, NodeKind, Reducer, RetryPolicyDef, SubWorkflowConfig, SwitchCase,
    ToolNodeConfig,
};
pub use state::{ActionDef, StateDef, StateKind, TransitionDef};
pub use workflow::{
    Backoff, CompensationPlanDef, CompensationStrategy, EdgeDef, EdgeKind, ErrorHandlerDef,
    PolicyDef, WorkflowDef, WorkflowDoc, WorkflowKind,
};
