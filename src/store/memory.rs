//! In-Memory Repositories - DashMap-backed reference implementations
//!
//! Back the tests and the CLI. Lock-free concurrent access; trivially
//! read-after-write consistent.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{Result, StrandError};
use crate::event::Event;
use crate::graph::Workflow;

use super::record::{ExecutionRecord, ExecutionStatus, NodeExecution};
use super::repo::{ExecutionRepo, ExecutionSnapshot, WorkflowRepo};

/// Workflow storage: id → workflow, (name, version) → id
#[derive(Default)]
pub struct MemoryWorkflowRepo {
    by_id: DashMap<String, Arc<Workflow>>,
    by_name_version: DashMap<(String, String), String>,
}

impl MemoryWorkflowRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepo for MemoryWorkflowRepo {
    async fn save(&self, workflow: Arc<Workflow>) -> Result<()> {
        self.by_name_version.insert(
            (workflow.name().to_string(), workflow.version().to_string()),
            workflow.id.clone(),
        );
        self.by_id.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    async fn load_by_id(&self, id: &str) -> Result<Arc<Workflow>> {
        self.by_id
            .get(id)
            .map(|w| Arc::clone(&w))
            .ok_or_else(|| StrandError::WorkflowNotFound {
                name: id.to_string(),
                version: "?".to_string(),
            })
    }

    async fn load_by_name_version(&self, name: &str, version: &str) -> Result<Arc<Workflow>> {
        let id = self
            .by_name_version
            .get(&(name.to_string(), version.to_string()))
            .map(|id| id.clone())
            .ok_or_else(|| StrandError::WorkflowNotFound {
                name: name.to_string(),
                version: version.to_string(),
            })?;
        self.load_by_id(&id).await
    }

    async fn list(&self) -> Result<Vec<Arc<Workflow>>> {
        Ok(self.by_id.iter().map(|e| Arc::clone(e.value())).collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Some((_, workflow)) = self.by_id.remove(id) {
            self.by_name_version
                .remove(&(workflow.name().to_string(), workflow.version().to_string()));
        }
        Ok(())
    }
}

/// Execution storage: records, node executions and the event trail
#[derive(Default)]
pub struct MemoryExecutionRepo {
    executions: DashMap<String, ExecutionRecord>,
    node_execs: DashMap<String, Vec<NodeExecution>>,
    events: DashMap<String, Vec<Event>>,
}

impl MemoryExecutionRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepo for MemoryExecutionRepo {
    async fn create(&self, record: ExecutionRecord) -> Result<()> {
        self.executions.insert(record.execution_id.clone(), record);
        Ok(())
    }

    async fn update(&self, record: ExecutionRecord) -> Result<()> {
        if !self.executions.contains_key(&record.execution_id) {
            return Err(StrandError::ExecutionNotFound {
                execution_id: record.execution_id,
            });
        }
        self.executions.insert(record.execution_id.clone(), record);
        Ok(())
    }

    async fn update_status(&self, execution_id: &str, status: ExecutionStatus) -> Result<()> {
        let mut entry =
            self.executions
                .get_mut(execution_id)
                .ok_or_else(|| StrandError::ExecutionNotFound {
                    execution_id: execution_id.to_string(),
                })?;
        entry.transition(status)
    }

    async fn append_node_exec(&self, node_exec: NodeExecution) -> Result<()> {
        self.node_execs
            .entry(node_exec.execution_id.clone())
            .or_default()
            .push(node_exec);
        Ok(())
    }

    async fn update_node_exec(&self, node_exec: NodeExecution) -> Result<()> {
        let mut list =
            self.node_execs
                .get_mut(&node_exec.execution_id)
                .ok_or_else(|| StrandError::ExecutionNotFound {
                    execution_id: node_exec.execution_id.clone(),
                })?;
        match list.iter_mut().find(|n| n.id == node_exec.id) {
            Some(slot) => {
                *slot = node_exec;
                Ok(())
            }
            None => {
                list.push(node_exec);
                Ok(())
            }
        }
    }

    async fn append_event(&self, execution_id: &str, event: Event) -> Result<()> {
        self.events
            .entry(execution_id.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn load_execution(&self, execution_id: &str) -> Result<ExecutionSnapshot> {
        let record = self
            .executions
            .get(execution_id)
            .map(|r| r.clone())
            .ok_or_else(|| StrandError::ExecutionNotFound {
                execution_id: execution_id.to_string(),
            })?;
        let node_execs = self
            .node_execs
            .get(execution_id)
            .map(|l| l.clone())
            .unwrap_or_default();
        let events = self
            .events
            .get(execution_id)
            .map(|l| l.clone())
            .unwrap_or_default();
        Ok(ExecutionSnapshot {
            record,
            node_execs,
            events,
        })
    }

    async fn list_by_status(&self, status: ExecutionStatus) -> Result<Vec<ExecutionRecord>> {
        Ok(self
            .executions
            .iter()
            .filter(|e| e.status == status)
            .map(|e| e.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::store::record::TriggerKind;
    use serde_json::json;

    fn sample_workflow(name: &str, version: &str) -> Arc<Workflow> {
        Workflow::from_yaml(&format!(
            r#"
workflow:
  name: {name}
  version: "{version}"
  nodes:
    - {{ id: a, type: tool, tool_id: t }}
"#
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn workflow_repo_save_and_load() {
        let repo = MemoryWorkflowRepo::new();
        let workflow = sample_workflow("wf", "1");
        let id = workflow.id.clone();

        repo.save(Arc::clone(&workflow)).await.unwrap();

        let by_id = repo.load_by_id(&id).await.unwrap();
        assert_eq!(by_id.name(), "wf");

        let by_name = repo.load_by_name_version("wf", "1").await.unwrap();
        assert_eq!(by_name.id, id);

        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn workflow_repo_versions_are_distinct() {
        let repo = MemoryWorkflowRepo::new();
        repo.save(sample_workflow("wf", "1")).await.unwrap();
        repo.save(sample_workflow("wf", "2")).await.unwrap();

        let v1 = repo.load_by_name_version("wf", "1").await.unwrap();
        let v2 = repo.load_by_name_version("wf", "2").await.unwrap();
        assert_ne!(v1.id, v2.id);
    }

    #[tokio::test]
    async fn workflow_repo_delete_removes_both_keys() {
        let repo = MemoryWorkflowRepo::new();
        let workflow = sample_workflow("wf", "1");
        let id = workflow.id.clone();
        repo.save(workflow).await.unwrap();
        repo.delete(&id).await.unwrap();

        assert!(repo.load_by_id(&id).await.is_err());
        assert!(repo.load_by_name_version("wf", "1").await.is_err());
    }

    #[tokio::test]
    async fn execution_repo_read_after_write() {
        let repo = MemoryExecutionRepo::new();
        let record = ExecutionRecord::new("wf", "1", json!({"v": 1}), TriggerKind::Manual);
        let id = record.execution_id.clone();

        repo.create(record).await.unwrap();
        repo.update_status(&id, ExecutionStatus::Running)
            .await
            .unwrap();

        let node = NodeExecution::new(&id, "a");
        let node_id = node.id.clone();
        repo.append_node_exec(node.clone()).await.unwrap();

        let mut updated = node;
        updated.transition(crate::store::record::NodeStatus::Ready).unwrap();
        repo.update_node_exec(updated).await.unwrap();

        let snapshot = repo.load_execution(&id).await.unwrap();
        assert_eq!(snapshot.record.status, ExecutionStatus::Running);
        assert_eq!(snapshot.node_execs.len(), 1);
        assert_eq!(snapshot.node_execs[0].id, node_id);
        assert_eq!(
            snapshot.node_execs[0].status,
            crate::store::record::NodeStatus::Ready
        );
    }

    #[tokio::test]
    async fn execution_repo_rejects_invalid_status_jump() {
        let repo = MemoryExecutionRepo::new();
        let record = ExecutionRecord::new("wf", "1", json!({}), TriggerKind::Manual);
        let id = record.execution_id.clone();
        repo.create(record).await.unwrap();

        let err = repo
            .update_status(&id, ExecutionStatus::Completed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("STRAND-023"));
    }

    #[tokio::test]
    async fn execution_repo_event_trail_is_ordered() {
        let repo = MemoryExecutionRepo::new();
        let record = ExecutionRecord::new("wf", "1", json!({}), TriggerKind::Manual);
        let id = record.execution_id.clone();
        repo.create(record).await.unwrap();

        let log = crate::event::EventLog::new();
        for kind in [EventKind::ExecutionStarted, EventKind::ExecutionCancelled] {
            let event = log.emit(kind);
            repo.append_event(&id, event).await.unwrap();
        }

        let snapshot = repo.load_execution(&id).await.unwrap();
        assert_eq!(snapshot.events.len(), 2);
        assert!(snapshot.events[0].seq < snapshot.events[1].seq);
    }

    #[tokio::test]
    async fn list_by_status_filters() {
        let repo = MemoryExecutionRepo::new();
        let a = ExecutionRecord::new("wf", "1", json!({}), TriggerKind::Manual);
        let mut b = ExecutionRecord::new("wf", "1", json!({}), TriggerKind::Manual);
        b.transition(ExecutionStatus::Running).unwrap();
        repo.create(a).await.unwrap();
        repo.create(b).await.unwrap();

        assert_eq!(
            repo.list_by_status(ExecutionStatus::Pending).await.unwrap().len(),
            1
        );
        assert_eq!(
            repo.list_by_status(ExecutionStatus::Running).await.unwrap().len(),
            1
        );
        assert!(repo
            .list_by_status(ExecutionStatus::Failed)
            .await
            .unwrap()
            .is_empty());
    }
}
