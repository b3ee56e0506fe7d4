//! Strand Error Types with Error Codes
//!
//! Error code ranges:
//! - STRAND-000-009: Workflow load/parse errors
//! - STRAND-010-019: Validation errors
//! - STRAND-020-029: Execution engine errors
//! - STRAND-030-039: Template/context errors
//! - STRAND-040-049: Scheduling/resource errors
//! - STRAND-050-059: Node execution errors
//! - STRAND-060-069: Agent adapter errors
//! - STRAND-070-079: Tool adapter errors
//! - STRAND-080-089: State machine errors
//! - STRAND-090-099: Compensation errors
//! - STRAND-100-109: Persistence/config/IO errors

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrandError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// Coarse error taxonomy surfaced to error handlers and persistence.
///
/// Handler configurations match on these names (snake_case in YAML).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Cycle,
    UnknownReference,
    Template,
    Agent,
    Tool,
    Timeout,
    Cancelled,
    CircuitOpen,
    ResourceExhausted,
    Compensation,
    StateMachine,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::Cycle => "cycle",
            Self::UnknownReference => "unknown_reference",
            Self::Template => "template",
            Self::Agent => "agent",
            Self::Tool => "tool",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Compensation => "compensation",
            Self::StateMachine => "state_machine",
            Self::Internal => "internal",
        };
        write!(f, "{}", name)
    }
}

/// Agent adapter failure subkinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    NotFound,
    Timeout,
    RateLimit,
    Auth,
    Execution,
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotFound => "not_found",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Execution => "execution",
        };
        write!(f, "{}", name)
    }
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for fancy terminal error display.
#[derive(Error, Debug, Diagnostic)]
#[diagnostic(url(docsrs))]
pub enum StrandError {
    // ═══════════════════════════════════════════
    // WORKFLOW LOAD/PARSE (000-009)
    // ═══════════════════════════════════════════
    #[error("[STRAND-001] Failed to parse workflow: {details}")]
    #[diagnostic(
        code(strand::parse_error),
        help("Check YAML syntax: indentation and quoting")
    )]
    ParseError { details: String },

    #[error("[STRAND-002] Workflow file not found: {path}")]
    #[diagnostic(code(strand::workflow_not_found), help("Check the file path exists"))]
    WorkflowFileNotFound { path: String },

    // ═══════════════════════════════════════════
    // VALIDATION (010-019)
    // ═══════════════════════════════════════════
    #[error("[STRAND-010] Workflow validation failed: {reason}")]
    #[diagnostic(
        code(strand::validation_error),
        help("Run `strand validate` for the full issue report")
    )]
    Validation { reason: String },

    #[error("[STRAND-011] Duplicate node ID: '{id}'")]
    DuplicateId { id: String },

    #[error("[STRAND-012] Unknown reference '{reference}' in {context}")]
    UnknownReference { reference: String, context: String },

    #[error("[STRAND-013] Cycle detected in DAG: {cycle}")]
    #[diagnostic(
        code(strand::cycle_detected),
        help("Remove circular dependencies from your workflow")
    )]
    CycleDetected { cycle: String },

    // ═══════════════════════════════════════════
    // EXECUTION ENGINE (020-029)
    // ═══════════════════════════════════════════
    #[error("[STRAND-020] Execution error: {reason}")]
    Execution { reason: String },

    #[error("[STRAND-021] Node '{node_id}' failed: {reason}")]
    NodeFailed { node_id: String, reason: String },

    #[error("[STRAND-022] Execution '{execution_id}' not found")]
    ExecutionNotFound { execution_id: String },

    #[error("[STRAND-023] Invalid status transition: {from} → {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("[STRAND-024] Switch '{node_id}' matched no case and has no default branch")]
    #[diagnostic(
        code(strand::unmatched_branch),
        help("Add a `default` branch to the switch node")
    )]
    UnmatchedBranch { node_id: String },

    // ═══════════════════════════════════════════
    // TEMPLATE/CONTEXT (030-039)
    // ═══════════════════════════════════════════
    #[error("[STRAND-030] Template parse error at position {position}: {details}")]
    TemplateParse { position: usize, details: String },

    #[error("[STRAND-031] Path '{path}' not found in context")]
    #[diagnostic(
        code(strand::path_not_found),
        help("Mark the reference nullable with `${{path?}}` or check upstream output")
    )]
    PathNotFound { path: String },

    #[error("[STRAND-032] Cannot traverse '{segment}' on {value_type} (expected object/array)")]
    InvalidTraversal {
        segment: String,
        value_type: String,
        full_path: String,
    },

    #[error("[STRAND-033] Condition parse error in '{expr}': {details}")]
    ConditionParse { expr: String, details: String },

    // ═══════════════════════════════════════════
    // SCHEDULING/RESOURCES (040-049)
    // ═══════════════════════════════════════════
    #[error("[STRAND-040] Rate limit exceeded for '{resource}': {reason}")]
    RateLimitExceeded { resource: String, reason: String },

    #[error("[STRAND-041] Circuit breaker open for '{resource}'")]
    #[diagnostic(
        code(strand::circuit_open),
        help("The resource is failing; calls resume after the cooldown probe succeeds")
    )]
    CircuitOpen { resource: String },

    #[error("[STRAND-042] Resource exhausted: '{resource}' ({reason})")]
    ResourceExhausted { resource: String, reason: String },

    // ═══════════════════════════════════════════
    // NODE EXECUTION (050-059)
    // ═══════════════════════════════════════════
    #[error("[STRAND-050] Node '{node_id}' timed out after {timeout_ms}ms")]
    Timeout { node_id: String, timeout_ms: u64 },

    #[error("[STRAND-051] Cancelled{}", node_id.as_deref().map(|n| format!(" (node '{}')", n)).unwrap_or_default())]
    Cancelled { node_id: Option<String> },

    #[error("[STRAND-052] Node '{node_id}' exhausted {attempts} attempts: {last_error}")]
    RetryExhausted {
        node_id: String,
        attempts: u32,
        last_error: String,
    },

    // ═══════════════════════════════════════════
    // AGENT ADAPTER (060-069)
    // ═══════════════════════════════════════════
    #[error("[STRAND-060] Agent '{agent_id}' error ({kind}): {reason}")]
    Agent {
        kind: AgentErrorKind,
        agent_id: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // TOOL ADAPTER (070-079)
    // ═══════════════════════════════════════════
    #[error("[STRAND-070] Tool '{tool_id}' error: {reason}")]
    Tool {
        tool_id: String,
        reason: String,
        retryable: bool,
    },

    #[error("[STRAND-071] Tool '{tool_id}' not registered")]
    ToolNotFound { tool_id: String },

    // ═══════════════════════════════════════════
    // STATE MACHINE (080-089)
    // ═══════════════════════════════════════════
    #[error("[STRAND-080] State machine instance '{instance_id}' not found")]
    InstanceNotFound { instance_id: String },

    #[error("[STRAND-081] Unknown state '{state}'")]
    UnknownState { state: String },

    #[error("[STRAND-082] Transition aborted in state '{state}' on '{event}': {reason}")]
    TransitionAborted {
        state: String,
        event: String,
        reason: String,
    },

    #[error("[STRAND-083] Action failed in state '{state}': {reason}")]
    ActionFailed { state: String, reason: String },

    // ═══════════════════════════════════════════
    // COMPENSATION (090-099)
    // ═══════════════════════════════════════════
    #[error("[STRAND-090] Compensation for node '{node_id}' failed: {reason}")]
    Compensation { node_id: String, reason: String },

    #[error("[STRAND-091] Compensation aborted: {failed} of {total} entries failed")]
    CompensationAborted { failed: usize, total: usize },

    // ═══════════════════════════════════════════
    // PERSISTENCE/CONFIG/IO (100-109)
    // ═══════════════════════════════════════════
    #[error("[STRAND-100] Workflow '{name}@{version}' not found in repository")]
    WorkflowNotFound { name: String, version: String },

    #[error("[STRAND-101] Config error: {reason}")]
    ConfigError { reason: String },

    #[error("[STRAND-102] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[STRAND-103] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[STRAND-104] YAML parse error: {0}")]
    #[diagnostic(
        code(strand::yaml_parse),
        help("Check YAML syntax: indentation must be consistent, strings with special chars need quoting")
    )]
    YamlParse(#[from] serde_yaml::Error),

    #[error("[STRAND-110] Internal error: {reason}")]
    Internal { reason: String },
}

impl StrandError {
    /// Get the error code (e.g., "STRAND-001")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "STRAND-001",
            Self::WorkflowFileNotFound { .. } => "STRAND-002",
            Self::Validation { .. } => "STRAND-010",
            Self::DuplicateId { .. } => "STRAND-011",
            Self::UnknownReference { .. } => "STRAND-012",
            Self::CycleDetected { .. } => "STRAND-013",
            Self::Execution { .. } => "STRAND-020",
            Self::NodeFailed { .. } => "STRAND-021",
            Self::ExecutionNotFound { .. } => "STRAND-022",
            Self::InvalidStatusTransition { .. } => "STRAND-023",
            Self::UnmatchedBranch { .. } => "STRAND-024",
            Self::TemplateParse { .. } => "STRAND-030",
            Self::PathNotFound { .. } => "STRAND-031",
            Self::InvalidTraversal { .. } => "STRAND-032",
            Self::ConditionParse { .. } => "STRAND-033",
            Self::RateLimitExceeded { .. } => "STRAND-040",
            Self::CircuitOpen { .. } => "STRAND-041",
            Self::ResourceExhausted { .. } => "STRAND-042",
            Self::Timeout { .. } => "STRAND-050",
            Self::Cancelled { .. } => "STRAND-051",
            Self::RetryExhausted { .. } => "STRAND-052",
            Self::Agent { .. } => "STRAND-060",
            Self::Tool { .. } => "STRAND-070",
            Self::ToolNotFound { .. } => "STRAND-071",
            Self::InstanceNotFound { .. } => "STRAND-080",
            Self::UnknownState { .. } => "STRAND-081",
            Self::TransitionAborted { .. } => "STRAND-082",
            Self::ActionFailed { .. } => "STRAND-083",
            Self::Compensation { .. } => "STRAND-090",
            Self::CompensationAborted { .. } => "STRAND-091",
            Self::WorkflowNotFound { .. } => "STRAND-100",
            Self::ConfigError { .. } => "STRAND-101",
            Self::IoError(_) => "STRAND-102",
            Self::JsonError(_) => "STRAND-103",
            Self::YamlParse(_) => "STRAND-104",
            Self::Internal { .. } => "STRAND-110",
        }
    }

    /// Map to the coarse taxonomy used by error handler matching
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ParseError { .. }
            | Self::WorkflowFileNotFound { .. }
            | Self::Validation { .. }
            | Self::YamlParse(_) => ErrorKind::Validation,
            Self::DuplicateId { .. } => ErrorKind::Validation,
            Self::UnknownReference { .. } => ErrorKind::UnknownReference,
            Self::CycleDetected { .. } => ErrorKind::Cycle,
            Self::TemplateParse { .. }
            | Self::PathNotFound { .. }
            | Self::InvalidTraversal { .. }
            | Self::ConditionParse { .. } => ErrorKind::Template,
            Self::RateLimitExceeded { .. } | Self::ResourceExhausted { .. } => {
                ErrorKind::ResourceExhausted
            }
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Agent { .. } => ErrorKind::Agent,
            Self::Tool { .. } | Self::ToolNotFound { .. } => ErrorKind::Tool,
            Self::InstanceNotFound { .. }
            | Self::UnknownState { .. }
            | Self::TransitionAborted { .. }
            | Self::ActionFailed { .. } => ErrorKind::StateMachine,
            Self::Compensation { .. } | Self::CompensationAborted { .. } => ErrorKind::Compensation,
            _ => ErrorKind::Internal,
        }
    }

    /// Check if the error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::RateLimitExceeded { .. } => true,
            Self::Agent { kind, .. } => matches!(
                kind,
                AgentErrorKind::Timeout | AgentErrorKind::RateLimit | AgentErrorKind::Execution
            ),
            Self::Tool { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Node the error originated from, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeFailed { node_id, .. }
            | Self::UnmatchedBranch { node_id }
            | Self::Timeout { node_id, .. }
            | Self::RetryExhausted { node_id, .. }
            | Self::Compensation { node_id, .. } => Some(node_id),
            Self::Cancelled { node_id } => node_id.as_deref(),
            _ => None,
        }
    }
}

impl FixSuggestion for StrandError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StrandError::ParseError { .. } => Some("Check YAML syntax: indentation and quoting"),
            StrandError::WorkflowFileNotFound { .. } => Some("Check the file path exists"),
            StrandError::Validation { .. } => {
                Some("Run `strand validate` for the full issue report")
            }
            StrandError::DuplicateId { .. } => Some("Node IDs must be unique within a workflow"),
            StrandError::UnknownReference { .. } => {
                Some("Every dependency, edge endpoint and branch must name a declared node")
            }
            StrandError::CycleDetected { .. } => {
                Some("Remove circular dependencies from your workflow")
            }
            StrandError::UnmatchedBranch { .. } => {
                Some("Add a `default` branch to the switch node")
            }
            StrandError::TemplateParse { .. } => Some("Use ${path.to.value} or ${path?} syntax"),
            StrandError::PathNotFound { .. } => {
                Some("Mark the reference nullable with ${path?} or check upstream output")
            }
            StrandError::InvalidTraversal { .. } => {
                Some("Check the path - accessing field on non-object")
            }
            StrandError::ConditionParse { .. } => {
                Some("Conditions support ==, !=, <, <=, >, >=, &&, ||, ! and parentheses")
            }
            StrandError::RateLimitExceeded { .. } => {
                Some("Raise the rate limit or slow the workflow down")
            }
            StrandError::CircuitOpen { .. } => {
                Some("The resource is failing; wait for the cooldown probe")
            }
            StrandError::Timeout { .. } => Some("Increase timeout_ms or optimize the node"),
            StrandError::RetryExhausted { .. } => {
                Some("Increase max_attempts or fix the underlying failure")
            }
            StrandError::Agent { .. } => Some("Check agent id and adapter configuration"),
            StrandError::Tool { .. } => Some("Check tool parameters and adapter logs"),
            StrandError::ToolNotFound { .. } => Some("Register the tool with the tool adapter"),
            StrandError::UnknownState { .. } => {
                Some("Every transition target must name a declared state")
            }
            StrandError::WorkflowNotFound { .. } => {
                Some("Save the workflow before executing it")
            }
            StrandError::ConfigError { .. } => {
                Some("Check ~/.config/strand/config.toml for syntax errors")
            }
            StrandError::IoError(_) => Some("Check file path and permissions"),
            StrandError::JsonError(_) => Some("Check JSON syntax"),
            StrandError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_extraction() {
        let err = StrandError::CircuitOpen {
            resource: "agent:gpt".to_string(),
        };
        assert_eq!(err.code(), "STRAND-041");
    }

    #[test]
    fn test_error_display_includes_code() {
        let err = StrandError::NodeFailed {
            node_id: "fetch".to_string(),
            reason: "timeout".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("[STRAND-021]"));
        assert!(msg.contains("fetch"));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            StrandError::CycleDetected {
                cycle: "a → b → a".into()
            }
            .kind(),
            ErrorKind::Cycle
        );
        assert_eq!(
            StrandError::Timeout {
                node_id: "x".into(),
                timeout_ms: 100
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            StrandError::Agent {
                kind: AgentErrorKind::Auth,
                agent_id: "a".into(),
                reason: "no key".into()
            }
            .kind(),
            ErrorKind::Agent
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(StrandError::Timeout {
            node_id: "x".into(),
            timeout_ms: 1000
        }
        .is_retryable());
        assert!(StrandError::Agent {
            kind: AgentErrorKind::RateLimit,
            agent_id: "a".into(),
            reason: "429".into()
        }
        .is_retryable());
        assert!(!StrandError::Agent {
            kind: AgentErrorKind::Auth,
            agent_id: "a".into(),
            reason: "denied".into()
        }
        .is_retryable());
        assert!(!StrandError::Validation {
            reason: "x".into()
        }
        .is_retryable());
        assert!(!StrandError::CircuitOpen {
            resource: "k1".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_node_id_extraction() {
        let err = StrandError::Timeout {
            node_id: "slow".into(),
            timeout_ms: 50,
        };
        assert_eq!(err.node_id(), Some("slow"));

        let err = StrandError::Cancelled { node_id: None };
        assert_eq!(err.node_id(), None);
    }

    #[test]
    fn test_error_kind_display_matches_serde() {
        let kind = ErrorKind::CircuitOpen;
        let json = serde_json::to_value(kind).unwrap();
        assert_eq!(json, "circuit_open");
        assert_eq!(kind.to_string(), "circuit_open");
    }
}
