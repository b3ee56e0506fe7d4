//! Execution Records - the mutable state of a running workflow
//!
//! One `ExecutionRecord` per invocation; `NodeExecution` records share the
//! parent execution's lifetime. Status transitions are monotonic and
//! guarded here so no caller can skip a lifecycle step:
//!
//! ```text
//! execution: pending → running → (completed | failed | cancelled)
//!            running ⇄ suspended, running → compensating → failed
//! node:      waiting → ready → running → (success | failed | cancelled)
//!            running ⇄ retrying, waiting → skipped
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{ErrorKind, StrandError};

/// Execution-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Suspended,
    Compensating,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Monotonic transition check
    pub fn can_transition(&self, to: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Suspended)
                | (Running, Compensating)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Suspended, Running)
                | (Suspended, Cancelled)
                | (Compensating, Failed)
                | (Compensating, Cancelled)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Compensating => "compensating",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Node-level status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Waiting,
    Ready,
    Running,
    Retrying,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Monotonic transition check
    pub fn can_transition(&self, to: NodeStatus) -> bool {
        use NodeStatus::*;
        matches!(
            (self, to),
            (Waiting, Ready)
                | (Waiting, Skipped)
                | (Waiting, Cancelled)
                | (Ready, Running)
                | (Ready, Cancelled)
                | (Ready, Skipped)
                | (Ready, Failed)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Retrying)
                | (Running, Cancelled)
                | (Running, Skipped)
                | (Retrying, Running)
                | (Retrying, Cancelled)
        )
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Waiting => "waiting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// What started the execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Manual,
    Api,
    Schedule,
    Event,
}

/// Failure info persisted on records and carried by events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    pub node_id: Option<String>,
    pub retryable: bool,
    pub trace_id: Option<String>,
}

impl From<&StrandError> for ErrorInfo {
    fn from(err: &StrandError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().to_string(),
            message: err.to_string(),
            node_id: err.node_id().map(str::to_string),
            retryable: err.is_retryable(),
            trace_id: None,
        }
    }
}

/// One record per workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub workflow_name: String,
    pub workflow_version: String,
    pub parent_execution_id: Option<String>,
    pub status: ExecutionStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<ErrorInfo>,
    /// Context tree persisted on suspend for crash-recovery/resume
    pub context_snapshot: Option<Value>,
    pub trigger: TriggerKind,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_version: impl Into<String>,
        input: Value,
        trigger: TriggerKind,
    ) -> Self {
        Self {
            execution_id: Uuid::new_v4().to_string(),
            workflow_name: workflow_name.into(),
            workflow_version: workflow_version.into(),
            parent_execution_id: None,
            status: ExecutionStatus::Pending,
            input,
            output: None,
            error: None,
            context_snapshot: None,
            trigger,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Guarded status transition; stamps start/end timestamps
    pub fn transition(&mut self, to: ExecutionStatus) -> Result<(), StrandError> {
        if !self.status.can_transition(to) {
            return Err(StrandError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = to;
        Ok(())
    }
}

/// One attempt of a node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Per-node execution state within one workflow execution.
///
/// Loop iterations get fresh records keyed `node_id[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: NodeStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub retry_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub attempts: Vec<AttemptRecord>,
}

impl NodeExecution {
    pub fn new(execution_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            node_id: node_id.into(),
            status: NodeStatus::Waiting,
            input: None,
            output: None,
            error: None,
            retry_count: 0,
            started_at: None,
            ended_at: None,
            attempts: Vec::new(),
        }
    }

    /// Guarded status transition
    pub fn transition(&mut self, to: NodeStatus) -> Result<(), StrandError> {
        if !self.status.can_transition(to) {
            return Err(StrandError::InvalidStatusTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        if to == NodeStatus::Running && self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        self.status = to;
        Ok(())
    }

    /// `running → success` requires a written output
    pub fn finish_success(&mut self, output: Value) -> Result<(), StrandError> {
        self.output = Some(output);
        self.transition(NodeStatus::Success)
    }

    /// `running → failed` requires recorded error info
    pub fn finish_failed(&mut self, error: ErrorInfo) -> Result<(), StrandError> {
        self.error = Some(error);
        self.transition(NodeStatus::Failed)
    }
}
