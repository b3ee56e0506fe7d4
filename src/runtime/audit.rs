//! Auditor - one call fans an event out to log, bus and persistence
//!
//! Every lifecycle event the engine produces goes to three places: the
//! execution's in-memory `EventLog` (ordering + inspection), the external
//! `EventEmitter` (bus), and the `ExecutionRepo` (durable trail). The
//! auditor keeps that a single call site.

use std::sync::Arc;

use tracing::warn;

use crate::event::{Event, EventEmitter, EventKind, EventLog};
use crate::store::ExecutionRepo;

/// Event fan-out for one execution
#[derive(Clone)]
pub struct Auditor {
    execution_id: Arc<str>,
    log: EventLog,
    emitter: Arc<dyn EventEmitter>,
    repo: Arc<dyn ExecutionRepo>,
}

impl Auditor {
    pub fn new(
        execution_id: Arc<str>,
        log: EventLog,
        emitter: Arc<dyn EventEmitter>,
        repo: Arc<dyn ExecutionRepo>,
    ) -> Self {
        Self {
            execution_id,
            log,
            emitter,
            repo,
        }
    }

    pub fn execution_id(&self) -> &Arc<str> {
        &self.execution_id
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Emit one event to log + bus + repo. Persistence failures are
    /// logged, not propagated: the audit trail must not fail the
    /// workflow.
    pub async fn emit(&self, kind: EventKind) -> Event {
        let event = self.log.emit(kind);
        self.emitter
            .publish(&self.execution_id, event.kind.topic(), &event);
        if let Err(e) = self
            .repo
            .append_event(&self.execution_id, event.clone())
            .await
        {
            warn!(execution_id = %self.execution_id, error = %e, "failed to persist event");
        }
        event
    }
}
