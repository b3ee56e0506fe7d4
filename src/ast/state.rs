//! State Machine Types - states, transitions and actions
//!
//! State-machine workflows are defined by named states and event-triggered
//! transitions. Transitions intentionally form cycles, so states are
//! addressed by name and transitions reference names, never objects.

use rustc_hash::FxHashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State role within the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Initial,
    #[default]
    Normal,
    Final,
}

/// A named state with entry/exit hooks and outgoing transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: StateKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_enter: Vec<ActionDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_exit: Vec<ActionDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<TransitionDef>,
}

/// Event-triggered transition. The first transition whose guard holds
/// (declaration order) is taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDef {
    pub event: String,
    /// Guard expression evaluated against a context snapshot; the event
    /// payload is visible under `event.payload`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDef>,
}

/// Action executed during enter/exit hooks and transitions.
///
/// Agent/tool invocations go through the same adapters as DAG nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDef {
    Log {
        message: String,
    },
    SetContext {
        path: String,
        value: Value,
    },
    EmitEvent {
        name: String,
        #[serde(default)]
        payload: Value,
    },
    InvokeAgent {
        agent_id: String,
        #[serde(default)]
        input: FxHashMap<String, String>,
    },
    InvokeTool {
        tool_id: String,
        #[serde(default)]
        params: FxHashMap<String, String>,
    },
    TimerStart {
        id: String,
        delay_ms: u64,
        event: String,
        #[serde(default)]
        payload: Value,
    },
    TimerCancel {
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_order_state() {
        let yaml = r#"
name: paid
transitions:
  - event: ship
    target: shipped
    actions:
      - invoke_tool:
          tool_id: notify_warehouse
on_enter:
  - log:
      message: "order paid"
"#;
        let state: StateDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(state.name, "paid");
        assert_eq!(state.kind, StateKind::Normal);
        assert_eq!(state.transitions.len(), 1);
        assert_eq!(state.transitions[0].target, "shipped");
        assert_eq!(state.on_enter.len(), 1);
    }

    #[test]
    fn parse_guarded_transition() {
        let yaml = r#"
event: pay
condition: "event.payload.amount >= 100"
target: paid
"#;
        let t: TransitionDef = serde_yaml::from_str(yaml).unwrap();
        assert!(t.condition.is_some());
        assert!(t.actions.is_empty());
    }

    #[test]
    fn parse_timer_actions() {
        let yaml = r#"
- timer_start:
    id: payment_deadline
    delay_ms: 60000
    event: payment_expired
- timer_cancel:
    id: payment_deadline
"#;
        let actions: Vec<ActionDef> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(actions.len(), 2);
        match &actions[0] {
            ActionDef::TimerStart { id, delay_ms, .. } => {
                assert_eq!(id, "payment_deadline");
                assert_eq!(*delay_ms, 60_000);
            }
            _ => panic!("expected timer_start"),
        }
    }

    #[test]
    fn state_roundtrips_through_yaml() {
        let yaml = r#"
name: created
type: initial
transitions:
  - event: pay
    target: paid
"#;
        let state: StateDef = serde_yaml::from_str(yaml).unwrap();
        let out = serde_yaml::to_string(&state).unwrap();
        let reparsed: StateDef = serde_yaml::from_str(&out).unwrap();
        assert_eq!(state, reparsed);
        assert_eq!(state.kind, StateKind::Initial);
    }
}
