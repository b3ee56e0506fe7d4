//! State Machine Instances - current state, context and history
//!
//! One instance per running machine. Instances are addressed by id and
//! mutated only under their per-instance lock (see `FsmEngine`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One committed transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: String,
    pub event: String,
    pub to: String,
    pub at: DateTime<Utc>,
    pub payload: Value,
}

/// A running state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub instance_id: Arc<str>,
    pub workflow_name: String,
    pub current_state: String,
    /// Mutable context tree written by `set_context` actions
    pub context: Value,
    pub history: Vec<TransitionRecord>,
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(
        instance_id: Arc<str>,
        workflow_name: impl Into<String>,
        initial_state: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            instance_id,
            workflow_name: workflow_name.into(),
            current_state: initial_state.into(),
            context,
            history: Vec::new(),
            is_final: false,
            created_at: Utc::now(),
        }
    }

    /// Commit a transition: state pointer + history entry, atomically
    /// from the caller's perspective (done under the instance lock)
    pub fn commit_transition(&mut self, event: &str, target: &str, payload: Value) {
        self.history.push(TransitionRecord {
            from: self.current_state.clone(),
            event: event.to_string(),
            to: target.to_string(),
            at: Utc::now(),
            payload,
        });
        self.current_state = target.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commit_records_history_and_moves_state() {
        let mut instance =
            Instance::new(Arc::from("i1"), "order", "created", json!({}));
        instance.commit_transition("pay", "paid", json!({"amount": 10}));

        assert_eq!(instance.current_state, "paid");
        assert_eq!(instance.history.len(), 1);
        assert_eq!(instance.history[0].from, "created");
        assert_eq!(instance.history[0].to, "paid");
        assert_eq!(instance.history[0].event, "pay");
    }

    #[test]
    fn instance_serializes() {
        let instance = Instance::new(Arc::from("i1"), "order", "created", json!({"v": 1}));
        let json = serde_json::to_string(&instance).unwrap();
        let back: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(back.current_state, "created");
        assert_eq!(back.context["v"], 1);
    }
}
