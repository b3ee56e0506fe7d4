//! EventLog - append-only audit trail per execution
//!
//! - `Event`: envelope with monotonic seq + timestamp + kind
//! - `EventKind`: lifecycle events across execution/node/fsm/compensation
//! - `EventLog`: thread-safe, append-only log
//!
//! Consumers dedupe re-delivered events on `(execution_id, seq)`; the
//! producer guarantees `seq` is monotonic within one execution.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in an execution's audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence within the execution (for ordering and dedup)
    pub seq: u64,
    /// Time since execution start (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EventKind,
}

/// All lifecycle event types.
///
/// Uses Arc<str> for node/instance ids to enable zero-cost cloning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // EXECUTION LEVEL
    // ═══════════════════════════════════════════
    ExecutionCreated {
        workflow: String,
        version: String,
        node_count: usize,
    },
    ExecutionStarted,
    ExecutionCompleted {
        output: Arc<Value>,
        total_duration_ms: u64,
    },
    ExecutionFailed {
        error: String,
        failed_node: Option<Arc<str>>,
    },
    ExecutionSuspended,
    ExecutionResumed,
    ExecutionCancelled,

    // ═══════════════════════════════════════════
    // NODE LEVEL
    // ═══════════════════════════════════════════
    NodeReady {
        node_id: Arc<str>,
        dependencies: Vec<Arc<str>>,
    },
    /// Node attempt begins with its resolved input snapshot
    NodeStarted {
        node_id: Arc<str>,
        input: Value,
        attempt: u32,
    },
    NodeCompleted {
        node_id: Arc<str>,
        output: Arc<Value>,
        duration_ms: u64,
    },
    NodeFailed {
        node_id: Arc<str>,
        error: String,
        retryable: bool,
        duration_ms: u64,
    },
    NodeRetrying {
        node_id: Arc<str>,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    NodeSkipped {
        node_id: Arc<str>,
        reason: String,
    },
    NodeCancelled {
        node_id: Arc<str>,
    },
    /// Switch decision, for audit of branch selection
    BranchSelected {
        node_id: Arc<str>,
        branch: Option<String>,
    },

    // ═══════════════════════════════════════════
    // STATE MACHINE LEVEL
    // ═══════════════════════════════════════════
    TransitionFired {
        instance_id: Arc<str>,
        from: String,
        event: String,
        to: String,
    },
    TransitionAborted {
        instance_id: Arc<str>,
        state: String,
        event: String,
        error: String,
    },
    EventUnhandled {
        instance_id: Arc<str>,
        event: String,
    },
    OnEnterFailed {
        instance_id: Arc<str>,
        state: String,
        error: String,
    },
    InstanceCompleted {
        instance_id: Arc<str>,
        state: String,
    },
    /// User-declared `emit_event` action payload
    CustomEvent {
        instance_id: Arc<str>,
        name: String,
        payload: Value,
    },

    // ═══════════════════════════════════════════
    // COMPENSATION LEVEL
    // ═══════════════════════════════════════════
    CompensationStarted {
        entries: usize,
    },
    CompensationEntryCompleted {
        node_id: Arc<str>,
        success: bool,
        error: Option<String>,
    },
    CompensationCompleted {
        success: bool,
    },
}

impl EventKind {
    /// External topic name (`execution.created`, `node.failed`, ...)
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ExecutionCreated { .. } => "execution.created",
            Self::ExecutionStarted => "execution.started",
            Self::ExecutionCompleted { .. } => "execution.completed",
            Self::ExecutionFailed { .. } => "execution.failed",
            Self::ExecutionSuspended => "execution.suspended",
            Self::ExecutionResumed => "execution.resumed",
            Self::ExecutionCancelled => "execution.cancelled",
            Self::NodeReady { .. } => "node.ready",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeCompleted { .. } => "node.completed",
            Self::NodeFailed { .. } => "node.failed",
            Self::NodeRetrying { .. } => "node.retrying",
            Self::NodeSkipped { .. } => "node.skipped",
            Self::NodeCancelled { .. } => "node.cancelled",
            Self::BranchSelected { .. } => "branch.selected",
            Self::TransitionFired { .. } => "transition.fired",
            Self::TransitionAborted { .. } => "transition.aborted",
            Self::EventUnhandled { .. } => "event.unhandled",
            Self::OnEnterFailed { .. } => "on_enter.failed",
            Self::InstanceCompleted { .. } => "instance.completed",
            Self::CustomEvent { .. } => "custom.event",
            Self::CompensationStarted { .. } => "compensation.started",
            Self::CompensationEntryCompleted { .. } => "compensation.entry_completed",
            Self::CompensationCompleted { .. } => "compensation.completed",
        }
    }

    /// Extract node_id if the event is node-related
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeReady { node_id, .. }
            | Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeRetrying { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::NodeCancelled { node_id }
            | Self::BranchSelected { node_id, .. }
            | Self::CompensationEntryCompleted { node_id, .. } => Some(node_id),
            Self::ExecutionFailed { failed_node, .. } => failed_node.as_deref(),
            _ => None,
        }
    }

    /// Check if this is an execution-level event
    pub fn is_execution_event(&self) -> bool {
        matches!(
            self,
            Self::ExecutionCreated { .. }
                | Self::ExecutionStarted
                | Self::ExecutionCompleted { .. }
                | Self::ExecutionFailed { .. }
                | Self::ExecutionSuspended
                | Self::ExecutionResumed
                | Self::ExecutionCancelled
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_seq: Arc<AtomicU64>,
}

impl EventLog {
    /// Create a new event log (call at execution start)
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Restore the sequence counter when resuming from persisted events
    pub fn with_start_seq(seq: u64) -> Self {
        let log = Self::new();
        log.next_seq.store(seq, Ordering::SeqCst);
        log
    }

    /// Emit an event (thread-safe); returns the appended event
    pub fn emit(&self, kind: EventKind) -> Event {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            seq,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event.clone());
        event
    }

    /// Get all events (cloned - use `with_events` for zero-copy access)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Zero-copy access to events via callback.
    ///
    /// Holds the read lock for the duration of the callback - keep it short.
    pub fn with_events<T>(&self, f: impl FnOnce(&[Event]) -> T) -> T {
        f(&self.events.read())
    }

    /// Filter events by node ID
    pub fn filter_node(&self, node_id: &str) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.node_id() == Some(node_id))
                .cloned()
                .collect()
        })
    }

    /// Filter execution-level events only
    pub fn execution_events(&self) -> Vec<Event> {
        self.with_events(|events| {
            events
                .iter()
                .filter(|e| e.kind.is_execution_event())
                .cloned()
                .collect()
        })
    }

    /// Serialize to JSON for persistence/export
    pub fn to_json(&self) -> Value {
        self.with_events(|events| serde_json::to_value(events).unwrap_or(Value::Null))
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn emit_returns_monotonic_seqs() {
        let log = EventLog::new();

        let e1 = log.emit(EventKind::ExecutionStarted);
        let e2 = log.emit(EventKind::NodeReady {
            node_id: "a".into(),
            dependencies: vec![],
        });
        let e3 = log.emit(EventKind::NodeStarted {
            node_id: "a".into(),
            input: json!({}),
            attempt: 1,
        });

        assert_eq!(e1.seq, 0);
        assert_eq!(e2.seq, 1);
        assert_eq!(e3.seq, 2);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn filter_node_returns_only_matching() {
        let log = EventLog::new();
        log.emit(EventKind::ExecutionStarted);
        log.emit(EventKind::NodeStarted {
            node_id: "alpha".into(),
            input: json!({}),
            attempt: 1,
        });
        log.emit(EventKind::NodeCompleted {
            node_id: "alpha".into(),
            output: Arc::new(json!("done")),
            duration_ms: 5,
        });
        log.emit(EventKind::NodeStarted {
            node_id: "beta".into(),
            input: json!({}),
            attempt: 1,
        });

        assert_eq!(log.filter_node("alpha").len(), 2);
        assert_eq!(log.filter_node("beta").len(), 1);
    }

    #[test]
    fn topic_names_match_external_contract() {
        assert_eq!(
            EventKind::ExecutionCreated {
                workflow: "w".into(),
                version: "1".into(),
                node_count: 0
            }
            .topic(),
            "execution.created"
        );
        assert_eq!(
            EventKind::NodeRetrying {
                node_id: "n".into(),
                attempt: 2,
                delay_ms: 10,
                error: "e".into()
            }
            .topic(),
            "node.retrying"
        );
        assert_eq!(
            EventKind::TransitionFired {
                instance_id: "i".into(),
                from: "a".into(),
                event: "go".into(),
                to: "b".into()
            }
            .topic(),
            "transition.fired"
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EventKind::NodeCompleted {
            node_id: "greet".into(),
            output: Arc::new(json!({"message": "hello"})),
            duration_ms: 150,
        };

        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "node_completed");
        assert_eq!(json["node_id"], "greet");
        assert_eq!(json["output"]["message"], "hello");
    }

    #[test]
    fn log_is_shared_through_clones() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EventKind::ExecutionStarted);
        assert_eq!(cloned.len(), 1);
    }

    #[test]
    fn concurrent_emits_produce_unique_seqs() {
        use std::thread;

        let log = EventLog::new();
        let handles: Vec<_> = (0..10)
            .map(|i| {
                let log = log.clone();
                thread::spawn(move || {
                    log.emit(EventKind::NodeSkipped {
                        node_id: Arc::from(format!("node{}", i)),
                        reason: "test".to_string(),
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let mut seqs: Vec<u64> = log.events().iter().map(|e| e.seq).collect();
        seqs.sort_unstable();
        seqs.dedup();
        assert_eq!(seqs.len(), 10);
    }

    #[test]
    fn with_start_seq_continues_numbering() {
        let log = EventLog::with_start_seq(7);
        let e = log.emit(EventKind::ExecutionResumed);
        assert_eq!(e.seq, 7);
    }
}
