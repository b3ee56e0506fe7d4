//! EventEmitter Trait - external bus abstraction
//!
//! The engine writes every event to its execution's `EventLog` and also
//! hands it to an `EventEmitter`, the seam for memory/Kafka/NATS
//! transports. At-least-once delivery is acceptable: consumers dedupe on
//! `(execution_id, seq)`.

use std::sync::Arc;

use parking_lot::Mutex;

use super::log::Event;

/// Bus-facing event sink. Implementations must be cheap and non-blocking;
/// slow transports should buffer internally.
pub trait EventEmitter: Send + Sync {
    /// Publish an event under its topic for a given execution
    fn publish(&self, execution_id: &str, topic: &str, event: &Event);
}

/// No-op emitter for tests and embedded use
#[derive(Debug, Clone, Default)]
pub struct NoopEmitter;

impl NoopEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl EventEmitter for NoopEmitter {
    fn publish(&self, _execution_id: &str, _topic: &str, _event: &Event) {}
}

/// In-memory emitter capturing published events; the test double for
/// bus assertions.
#[derive(Debug, Clone, Default)]
pub struct MemoryEmitter {
    published: Arc<Mutex<Vec<(String, String, Event)>>>,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(execution_id, topic, event)` triples published so far
    pub fn published(&self) -> Vec<(String, String, Event)> {
        self.published.lock().clone()
    }

    /// Topics published for one execution, in order
    pub fn topics_for(&self, execution_id: &str) -> Vec<String> {
        self.published
            .lock()
            .iter()
            .filter(|(id, _, _)| id == execution_id)
            .map(|(_, topic, _)| topic.clone())
            .collect()
    }
}

impl EventEmitter for MemoryEmitter {
    fn publish(&self, execution_id: &str, topic: &str, event: &Event) {
        self.published
            .lock()
            .push((execution_id.to_string(), topic.to_string(), event.clone()));
    }
}
