//! Saga Module - compensation log and rollback manager
//!
//! As nodes commit `success`, the engine appends a compensation entry
//! (action ref + input resolved at commit time) to a per-execution log.
//! On a compensate trigger the manager replays the log:
//! - `sequential_reverse` (default): exact reverse of completion order
//! - `parallel`: all entries concurrently
//! - `custom_plan`: the declared node order
//!
//! Each entry gets its own timeout and a best-effort retry budget; the
//! overall result is success iff every entry succeeded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::adapter::ToolAdapter;
use crate::ast::{CompensationPlanDef, CompensationStrategy};
use crate::event::EventKind;
use crate::runtime::Auditor;

/// One recorded undo action
#[derive(Debug, Clone)]
pub struct CompensationEntry {
    pub node_id: Arc<str>,
    pub tool_id: String,
    pub input: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Per-execution compensation log, appended on success commit (never at
/// dispatch, so partial failures leave no dangling entries).
#[derive(Default, Clone)]
pub struct CompensationLog {
    entries: Arc<Mutex<Vec<CompensationEntry>>>,
}

impl CompensationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node_id: Arc<str>, tool_id: String, input: Value) {
        self.entries.lock().push(CompensationEntry {
            node_id,
            tool_id,
            input,
            recorded_at: Utc::now(),
        });
    }

    /// Entries in completion order
    pub fn entries(&self) -> Vec<CompensationEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one compensating action
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub node_id: Arc<str>,
    pub success: bool,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Result of a full compensation run
#[derive(Debug, Clone)]
pub struct CompensationReport {
    /// True iff every entry succeeded
    pub success: bool,
    /// Per-entry outcomes in the order they ran
    pub outcomes: Vec<EntryOutcome>,
    /// True when abort-on-error stopped the run early
    pub aborted: bool,
}

/// Runs Saga rollback over a compensation log
pub struct CompensationManager {
    tools: Arc<dyn ToolAdapter>,
}

impl CompensationManager {
    pub fn new(tools: Arc<dyn ToolAdapter>) -> Self {
        Self { tools }
    }

    /// Replay the log per the plan. Emits `compensation.*` events
    /// through the auditor.
    pub async fn run(
        &self,
        plan: &CompensationPlanDef,
        log: &CompensationLog,
        auditor: &Auditor,
        cancel: &CancellationToken,
    ) -> CompensationReport {
        let recorded = log.entries();
        let ordered: Vec<CompensationEntry> = match plan.strategy {
            CompensationStrategy::SequentialReverse => {
                recorded.iter().rev().cloned().collect()
            }
            CompensationStrategy::Parallel => recorded.clone(),
            CompensationStrategy::CustomPlan => plan
                .custom_order
                .iter()
                .filter_map(|id| {
                    recorded
                        .iter()
                        .find(|e| e.node_id.as_ref() == id.as_str())
                        .cloned()
                })
                .collect(),
        };

        auditor
            .emit(EventKind::CompensationStarted {
                entries: ordered.len(),
            })
            .await;

        let mut outcomes: Vec<EntryOutcome> = Vec::with_capacity(ordered.len());
        let mut aborted = false;

        if plan.strategy == CompensationStrategy::Parallel {
            let futures: Vec<_> = ordered
                .iter()
                .map(|entry| self.run_entry(entry, plan, cancel))
                .collect();
            outcomes.extend(join_all(futures).await);
            for outcome in &outcomes {
                auditor
                    .emit(EventKind::CompensationEntryCompleted {
                        node_id: Arc::clone(&outcome.node_id),
                        success: outcome.success,
                        error: outcome.error.clone(),
                    })
                    .await;
            }
        } else {
            for entry in &ordered {
                let outcome = self.run_entry(entry, plan, cancel).await;
                auditor
                    .emit(EventKind::CompensationEntryCompleted {
                        node_id: Arc::clone(&outcome.node_id),
                        success: outcome.success,
                        error: outcome.error.clone(),
                    })
                    .await;
                let failed = !outcome.success;
                outcomes.push(outcome);
                if failed && !plan.continue_on_error {
                    aborted = true;
                    break;
                }
            }
        }

        let success = !aborted
            && outcomes.len() == ordered.len()
            && outcomes.iter().all(|o| o.success);

        auditor
            .emit(EventKind::CompensationCompleted { success })
            .await;

        CompensationReport {
            success,
            outcomes,
            aborted,
        }
    }

    /// One entry with its timeout and retry budget
    async fn run_entry(
        &self,
        entry: &CompensationEntry,
        plan: &CompensationPlanDef,
        cancel: &CancellationToken,
    ) -> EntryOutcome {
        let max_attempts = plan.retry_budget + 1;
        let timeout = Duration::from_millis(plan.entry_timeout_ms.max(1));
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let deadline = Instant::now() + timeout;
            let call = self
                .tools
                .invoke(&entry.tool_id, entry.input.clone(), cancel, Some(deadline));

            let result = tokio::select! {
                result = call => result,
                _ = tokio::time::sleep(timeout) => Err(crate::error::StrandError::Timeout {
                    node_id: entry.node_id.to_string(),
                    timeout_ms: plan.entry_timeout_ms,
                }),
                _ = cancel.cancelled() => Err(crate::error::StrandError::Cancelled {
                    node_id: Some(entry.node_id.to_string()),
                }),
            };

            match result {
                Ok(_) => {
                    debug!(node_id = %entry.node_id, attempt, "compensation entry succeeded");
                    return EntryOutcome {
                        node_id: Arc::clone(&entry.node_id),
                        success: true,
                        attempts: attempt,
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(node_id = %entry.node_id, attempt, error = %e, "compensation entry failed");
                    let cancelled = matches!(e, crate::error::StrandError::Cancelled { .. });
                    last_error = Some(e.to_string());
                    if cancelled {
                        break;
                    }
                }
            }
        }

        EntryOutcome {
            node_id: Arc::clone(&entry.node_id),
            success: false,
            attempts: max_attempts,
            error: last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockToolAdapter;
    use crate::event::{EventLog, NoopEmitter};
    use crate::store::MemoryExecutionRepo;
    use serde_json::json;

    fn auditor() -> Auditor {
        Auditor::new(
            Arc::from("exec-test"),
            EventLog::new(),
            Arc::new(NoopEmitter::new()),
            Arc::new(MemoryExecutionRepo::new()),
        )
    }

    fn seeded_log() -> CompensationLog {
        let log = CompensationLog::new();
        log.record(Arc::from("a"), "undo".to_string(), json!({"step": "a"}));
        log.record(Arc::from("b"), "undo".to_string(), json!({"step": "b"}));
        log.record(Arc::from("c"), "undo".to_string(), json!({"step": "c"}));
        log
    }

    fn recording_tools() -> (Arc<MockToolAdapter>, Arc<Mutex<Vec<String>>>) {
        let order = Arc::new(Mutex::new(Vec::new()));
        let tools = Arc::new(MockToolAdapter::new());
        let order2 = Arc::clone(&order);
        tools.register("undo", move |params| {
            order2.lock().push(params["step"].as_str().unwrap().to_string());
            Ok(json!("undone"))
        });
        (tools, order)
    }

    #[tokio::test]
    async fn sequential_reverse_runs_in_exact_reverse_order() {
        let (tools, order) = recording_tools();
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef::default();

        let report = manager
            .run(&plan, &seeded_log(), &auditor(), &CancellationToken::new())
            .await;

        assert!(report.success);
        assert_eq!(*order.lock(), vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn custom_plan_follows_declared_order() {
        let (tools, order) = recording_tools();
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef {
            strategy: CompensationStrategy::CustomPlan,
            custom_order: vec!["b".to_string(), "a".to_string(), "c".to_string()],
            ..Default::default()
        };

        let report = manager
            .run(&plan, &seeded_log(), &auditor(), &CancellationToken::new())
            .await;

        assert!(report.success);
        assert_eq!(*order.lock(), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn parallel_runs_every_entry() {
        let (tools, order) = recording_tools();
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef {
            strategy: CompensationStrategy::Parallel,
            ..Default::default()
        };

        let report = manager
            .run(&plan, &seeded_log(), &auditor(), &CancellationToken::new())
            .await;

        assert!(report.success);
        let mut ran = order.lock().clone();
        ran.sort();
        assert_eq!(ran, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn abort_on_error_stops_the_run() {
        let (tools, order) = recording_tools();
        // First entry to run (reverse order: "c") fails
        tools.fail_next("undo", "boom", false);
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef::default();

        let report = manager
            .run(&plan, &seeded_log(), &auditor(), &CancellationToken::new())
            .await;

        assert!(!report.success);
        assert!(report.aborted);
        assert_eq!(report.outcomes.len(), 1);
        assert!(order.lock().is_empty());
    }

    #[tokio::test]
    async fn continue_on_error_runs_remaining_entries() {
        let (tools, order) = recording_tools();
        tools.fail_next("undo", "boom", false);
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef {
            continue_on_error: true,
            ..Default::default()
        };

        let report = manager
            .run(&plan, &seeded_log(), &auditor(), &CancellationToken::new())
            .await;

        assert!(!report.success);
        assert!(!report.aborted);
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(*order.lock(), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn retry_budget_retries_failed_entries() {
        let (tools, order) = recording_tools();
        tools.fail_next("undo", "transient", true);
        let manager = CompensationManager::new(tools);
        let plan = CompensationPlanDef {
            retry_budget: 1,
            ..Default::default()
        };
        let log = CompensationLog::new();
        log.record(Arc::from("only"), "undo".to_string(), json!({"step": "only"}));

        let report = manager
            .run(&plan, &log, &auditor(), &CancellationToken::new())
            .await;

        assert!(report.success);
        assert_eq!(report.outcomes[0].attempts, 2);
        assert_eq!(*order.lock(), vec!["only"]);
    }

    #[tokio::test]
    async fn compensation_events_are_emitted() {
        let (tools, _) = recording_tools();
        let manager = CompensationManager::new(tools);
        let auditor = auditor();

        manager
            .run(
                &CompensationPlanDef::default(),
                &seeded_log(),
                &auditor,
                &CancellationToken::new(),
            )
            .await;

        let events = auditor.log().events();
        assert!(matches!(
            events.first().unwrap().kind,
            EventKind::CompensationStarted { entries: 3 }
        ));
        assert!(matches!(
            events.last().unwrap().kind,
            EventKind::CompensationCompleted { success: true }
        ));
        let entry_events = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::CompensationEntryCompleted { .. }))
            .count();
        assert_eq!(entry_events, 3);
    }
}
