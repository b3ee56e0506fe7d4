//! Adapter Module - external collaborator seams
//!
//! The core consumes these interfaces; real LLM providers and tool
//! executors live outside:
//! - `agent`: AgentAdapter + scriptable MockAgentAdapter
//! - `tool`: ToolAdapter + closure-backed MockToolAdapter

mod agent;
mod tool;

pub use agent::{AgentAdapter, AgentRequest, AgentResponse, AgentUsage, MockAgentAdapter, MockOutcome};
pub use tool::{MockToolAdapter, ToolAdapter, ToolFn};
