//! Repository Traits - the persistence seam
//!
//! The core consumes these interfaces; the SQL/ORM back-end lives
//! outside. The one consistency requirement: read-after-write within a
//! single execution's records.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::Event;
use crate::graph::Workflow;

use super::record::{ExecutionRecord, ExecutionStatus, NodeExecution};

/// Everything persisted for one execution
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub record: ExecutionRecord,
    pub node_execs: Vec<NodeExecution>,
    pub events: Vec<Event>,
}

/// Storage for immutable, versioned workflow definitions
#[async_trait]
pub trait WorkflowRepo: Send + Sync {
    async fn save(&self, workflow: Arc<Workflow>) -> Result<()>;
    async fn load_by_id(&self, id: &str) -> Result<Arc<Workflow>>;
    async fn load_by_name_version(&self, name: &str, version: &str) -> Result<Arc<Workflow>>;
    async fn list(&self) -> Result<Vec<Arc<Workflow>>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Storage for mutable execution state and the append-only event trail
#[async_trait]
pub trait ExecutionRepo: Send + Sync {
    async fn create(&self, record: ExecutionRecord) -> Result<()>;

    /// Replace the stored record (output/error/context updates)
    async fn update(&self, record: ExecutionRecord) -> Result<()>;

    /// Guarded status-only update
    async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()>;

    async fn append_node_exec(&self, node_exec: NodeExecution) -> Result<()>;

    /// Replace a node execution by its record id
    async fn update_node_exec(&self, node_exec: NodeExecution) -> Result<()>;

    async fn append_event(&self, execution_id: &str, event: Event) -> Result<()>;

    async fn load_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot>;

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>>;
}
