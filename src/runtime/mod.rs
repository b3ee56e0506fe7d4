//! Runtime Module - DAG workflow execution
//!
//! Contains the runtime execution components:
//! - `runner`: the execution engine (lifecycle, ready-set, control nodes)
//! - `executor`: capability registry `{kind → executor}` + deadline racing
//! - `aggregate`: aggregation reducers
//! - `audit`: event fan-out (log + bus + persistence)
//!
//! This module is the "how" of a running workflow; for the static
//! structure see `ast` and `graph`.

mod aggregate;
mod audit;
mod executor;
mod runner;

pub use aggregate::{merged_input, reduce};
pub use audit::Auditor;
pub use executor::{
    invoke_with_deadline, AgentInvoker, InvokeRequest, InvokerRegistry, NodeInvoker, ToolInvoker,
};
pub use runner::{
    EngineDefaults, ExecutionControl, ExecutionEngine, ExecutionReport,
};
