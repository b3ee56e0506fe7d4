//! State machine scenarios: the order flow and friends

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;

use strand::adapter::{MockAgentAdapter, MockToolAdapter};
use strand::event::{EventKind, MemoryEmitter};
use strand::fsm::{FsmEngine, TransitionOutcome};
use strand::graph::Workflow;

fn order_workflow() -> Arc<Workflow> {
    Workflow::from_yaml(
        r#"
workflow:
  name: order_flow
  type: state_machine
  initial_state: created
  states:
    - name: created
      type: initial
      transitions:
        - { event: pay, target: paid }
    - name: paid
      transitions:
        - { event: ship, target: shipped }
    - name: shipped
      transitions:
        - { event: deliver, target: delivered }
    - name: delivered
      type: final
"#,
    )
    .unwrap()
}

struct FsmHarness {
    engine: FsmEngine,
    tools: Arc<MockToolAdapter>,
    emitter: Arc<MemoryEmitter>,
}

fn fsm(workflow: Arc<Workflow>) -> FsmHarness {
    let tools = Arc::new(MockToolAdapter::new());
    let emitter = Arc::new(MemoryEmitter::new());
    let engine = FsmEngine::new(
        workflow,
        Arc::new(MockAgentAdapter::new()),
        Arc::clone(&tools) as _,
        Arc::clone(&emitter) as _,
    )
    .unwrap();
    FsmHarness {
        engine,
        tools,
        emitter,
    }
}

#[tokio::test]
async fn order_flow_reaches_delivered() {
    let h = fsm(order_workflow());
    let id = h.engine.create_instance(json!({})).await.unwrap();

    for event in ["pay", "ship", "deliver"] {
        let outcome = h.engine.process_event(&id, event, json!({})).await.unwrap();
        assert!(
            matches!(outcome, TransitionOutcome::Fired { .. }),
            "{} should fire",
            event
        );
    }

    let instance = h.engine.instance(&id).await.unwrap();
    assert_eq!(instance.history.len(), 3);
    assert_eq!(instance.current_state, "delivered");
    assert!(instance.is_final);

    // History preserves the exact path
    let path: Vec<(String, String)> = instance
        .history
        .iter()
        .map(|t| (t.from.clone(), t.to.clone()))
        .collect();
    assert_eq!(
        path,
        vec![
            ("created".to_string(), "paid".to_string()),
            ("paid".to_string(), "shipped".to_string()),
            ("shipped".to_string(), "delivered".to_string()),
        ]
    );
}

#[tokio::test]
async fn unknown_event_from_final_state_is_unhandled() {
    let h = fsm(order_workflow());
    let id = h.engine.create_instance(json!({})).await.unwrap();

    for event in ["pay", "ship", "deliver"] {
        h.engine.process_event(&id, event, json!({})).await.unwrap();
    }

    let outcome = h
        .engine
        .process_event(&id, "refund", json!({}))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Unhandled);

    let instance = h.engine.instance(&id).await.unwrap();
    assert_eq!(instance.current_state, "delivered");
    assert_eq!(instance.history.len(), 3);

    let unhandled = h
        .engine
        .events()
        .events()
        .iter()
        .filter(|e| {
            matches!(&e.kind, EventKind::EventUnhandled { event, .. } if event == "refund")
        })
        .count();
    assert_eq!(unhandled, 1);
}

#[tokio::test]
async fn transition_events_reach_the_bus() {
    let h = fsm(order_workflow());
    let id = h.engine.create_instance(json!({})).await.unwrap();

    h.engine.process_event(&id, "pay", json!({})).await.unwrap();

    let topics = h.emitter.topics_for(&id);
    assert!(topics.contains(&"transition.fired".to_string()));
}

#[tokio::test]
async fn transition_actions_run_through_adapters() {
    let workflow = Workflow::from_yaml(
        r#"
workflow:
  name: notifying
  type: state_machine
  initial_state: created
  states:
    - name: created
      type: initial
      transitions:
        - event: pay
          target: paid
          actions:
            - invoke_tool:
                tool_id: send_receipt
                params:
                  amount: "${event.payload.amount}"
    - name: paid
      type: final
"#,
    )
    .unwrap();
    let h = fsm(workflow);
    h.tools.register("send_receipt", |params| {
        assert_eq!(params["amount"], 25);
        Ok(json!({"sent": true}))
    });

    let id = h.engine.create_instance(json!({})).await.unwrap();
    let outcome = h
        .engine
        .process_event(&id, "pay", json!({"amount": 25}))
        .await
        .unwrap();
    assert!(matches!(outcome, TransitionOutcome::Fired { .. }));
    assert_eq!(h.tools.call_count("send_receipt"), 1);

    // Tool output is visible in the instance context
    let instance = h.engine.instance(&id).await.unwrap();
    assert_eq!(instance.context["actions"]["send_receipt"]["sent"], true);
}

#[tokio::test]
async fn concurrent_instances_do_not_interfere() {
    let h = fsm(order_workflow());
    let a = h.engine.create_instance(json!({"order": "a"})).await.unwrap();
    let b = h.engine.create_instance(json!({"order": "b"})).await.unwrap();

    let engine_a = h.engine.clone();
    let id_a = a.to_string();
    let task_a = tokio::spawn(async move {
        for event in ["pay", "ship", "deliver"] {
            engine_a
                .process_event(&id_a, event, json!({}))
                .await
                .unwrap();
        }
    });
    let engine_b = h.engine.clone();
    let id_b = b.to_string();
    let task_b = tokio::spawn(async move {
        engine_b.process_event(&id_b, "pay", json!({})).await.unwrap();
    });

    task_a.await.unwrap();
    task_b.await.unwrap();

    assert_eq!(h.engine.instance(&a).await.unwrap().current_state, "delivered");
    assert_eq!(h.engine.instance(&b).await.unwrap().current_state, "paid");
}

#[tokio::test]
async fn after_process_event_state_is_prior_or_single_target() {
    // Two transitions on the same event: exactly one target wins
    let workflow = Workflow::from_yaml(
        r#"
workflow:
  name: exclusive
  type: state_machine
  initial_state: triage
  states:
    - name: triage
      type: initial
      transitions:
        - event: assess
          condition: "event.payload.score >= 8"
          target: critical
        - event: assess
          condition: "event.payload.score >= 4"
          target: elevated
        - event: assess
          target: routine
    - name: critical
    - name: elevated
    - name: routine
"#,
    )
    .unwrap();
    let h = fsm(workflow);

    for (score, expected) in [(9, "critical"), (5, "elevated"), (1, "routine")] {
        let id = h.engine.create_instance(json!({})).await.unwrap();
        h.engine
            .process_event(&id, "assess", json!({"score": score}))
            .await
            .unwrap();
        let instance = h.engine.instance(&id).await.unwrap();
        assert_eq!(instance.current_state, expected, "score {}", score);
        assert_eq!(instance.history.len(), 1);
    }
}
