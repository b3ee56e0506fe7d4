//! State Machine Engine - event intake and transition execution
//!
//! `process_event` follows a strict sequence:
//! 1. select transitions on the current state matching the event name
//! 2. take the first whose guard holds; none → `event.unhandled`, no
//!    mutation
//! 3. run the current state's `on_exit` actions; a failure aborts the
//!    transition (state unchanged, `transition.aborted`)
//! 4. run the transition's own actions (failure also aborts; nothing is
//!    committed yet)
//! 5. atomically commit `current_state` + history entry
//! 6. run the target's `on_enter` actions; failures here do NOT roll
//!    back (`on_enter.failed`)
//! 7. a final target sets `is_final` and emits `instance.completed`
//!
//! Events for the same instance are serialized by a per-instance mutex;
//! different instances process concurrently. Guards and action templates
//! see the snapshot `{"context": ..., "event": {"name", "payload"}}`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::{AgentAdapter, AgentRequest, ToolAdapter};
use crate::ast::{ActionDef, StateDef, StateKind, TransitionDef, WorkflowKind};
use crate::context::{Condition, ContextPath, ExecutionContext, Template};
use crate::error::{Result, StrandError};
use crate::event::{EventEmitter, EventKind, EventLog};
use crate::graph::Workflow;

use super::instance::Instance;

/// What `process_event` did
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Fired { from: String, to: String },
    Unhandled,
    Aborted { reason: String },
}

struct CompiledTransition {
    def: TransitionDef,
    guard: Option<Condition>,
}

struct CompiledState {
    def: StateDef,
    transitions: Vec<CompiledTransition>,
}

/// Event-driven state machine engine for one workflow definition.
/// Cheap to clone; instances and timers are shared.
#[derive(Clone)]
pub struct FsmEngine {
    workflow: Arc<Workflow>,
    states: Arc<FxHashMap<String, CompiledState>>,
    initial_state: Arc<str>,
    instances: Arc<DashMap<Arc<str>, Arc<Mutex<Instance>>>>,
    timers: Arc<DashMap<String, JoinHandle<()>>>,
    agents: Arc<dyn AgentAdapter>,
    tools: Arc<dyn ToolAdapter>,
    emitter: Arc<dyn EventEmitter>,
    events: EventLog,
    /// Deadline applied to agent/tool actions
    action_timeout: Duration,
}

impl FsmEngine {
    pub fn new(
        workflow: Arc<Workflow>,
        agents: Arc<dyn AgentAdapter>,
        tools: Arc<dyn ToolAdapter>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self> {
        if workflow.def.kind != WorkflowKind::StateMachine {
            return Err(StrandError::Validation {
                reason: "DAG workflows run on the ExecutionEngine".to_string(),
            });
        }

        let mut states = FxHashMap::default();
        for state in &workflow.def.states {
            let mut transitions = Vec::with_capacity(state.transitions.len());
            for t in &state.transitions {
                let guard = match &t.condition {
                    Some(raw) => Some(Condition::parse(raw)?),
                    None => None,
                };
                transitions.push(CompiledTransition {
                    def: t.clone(),
                    guard,
                });
            }
            states.insert(
                state.name.clone(),
                CompiledState {
                    def: state.clone(),
                    transitions,
                },
            );
        }

        let initial_state: Arc<str> = match &workflow.def.initial_state {
            Some(name) => Arc::from(name.as_str()),
            None => workflow
                .def
                .states
                .iter()
                .find(|s| s.kind == StateKind::Initial)
                .map(|s| Arc::from(s.name.as_str()))
                .ok_or_else(|| StrandError::Validation {
                    reason: "state machine has no initial state".to_string(),
                })?,
        };

        Ok(Self {
            workflow,
            states: Arc::new(states),
            initial_state,
            instances: Arc::new(DashMap::new()),
            timers: Arc::new(DashMap::new()),
            agents,
            tools,
            emitter,
            events: EventLog::new(),
            action_timeout: Duration::from_secs(30),
        })
    }

    /// The engine's event log (all instances)
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Create an instance in the initial state and run its `on_enter`
    /// actions.
    pub async fn create_instance(&self, context: Value) -> Result<Arc<str>> {
        let instance_id: Arc<str> = Arc::from(Uuid::new_v4().to_string().as_str());
        let instance = Instance::new(
            Arc::clone(&instance_id),
            self.workflow.name(),
            self.initial_state.as_ref(),
            context,
        );
        self.instances.insert(
            Arc::clone(&instance_id),
            Arc::new(Mutex::new(instance)),
        );
        info!(instance_id = %instance_id, state = %self.initial_state, "instance created");

        // Initial entry hooks
        let lock = {
            let entry = self.instances.get(&instance_id).expect("just inserted");
            Arc::clone(entry.value())
        };
        let mut guard = lock.lock().await;
        let state = self
            .states
            .get(self.initial_state.as_ref())
            .expect("initial state compiled");
        let on_enter = state.def.on_enter.clone();
        let root = snapshot_root(&guard.context, "", &Value::Null);
        let mut working = guard.context.clone();
        if let Err(e) = self
            .run_actions(&on_enter, &mut working, &root, &instance_id)
            .await
        {
            self.emit(
                &instance_id,
                EventKind::OnEnterFailed {
                    instance_id: Arc::clone(&instance_id),
                    state: self.initial_state.to_string(),
                    error: e.to_string(),
                },
            );
        } else {
            guard.context = working;
        }
        drop(guard);

        Ok(instance_id)
    }

    /// Snapshot of an instance (for inspection and tests)
    pub async fn instance(&self, instance_id: &str) -> Result<Instance> {
        let lock = {
            let entry = self
                .instances
                .get(instance_id)
                .ok_or_else(|| StrandError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                })?;
            Arc::clone(entry.value())
        };
        let guard = lock.lock().await;
        Ok(guard.clone())
    }

    /// Deliver an event to an instance
    #[instrument(skip(self, payload), fields(instance_id = %instance_id, event = %event))]
    pub async fn process_event(
        &self,
        instance_id: &str,
        event: &str,
        payload: Value,
    ) -> Result<TransitionOutcome> {
        let lock = {
            let entry = self
                .instances
                .get(instance_id)
                .ok_or_else(|| StrandError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                })?;
            Arc::clone(entry.value())
        };

        // Per-instance serialization point
        let mut instance = lock.lock().await;
        let iid = Arc::clone(&instance.instance_id);

        let Some(current) = self.states.get(&instance.current_state) else {
            return Err(StrandError::UnknownState {
                state: instance.current_state.clone(),
            });
        };

        // Transition selection: first matching event with satisfied guard
        let root = snapshot_root(&instance.context, event, &payload);
        let mut selected: Option<&CompiledTransition> = None;
        for transition in &current.transitions {
            if transition.def.event != event {
                continue;
            }
            match &transition.guard {
                Some(guard) if !guard.eval(&root)? => continue,
                _ => {
                    selected = Some(transition);
                    break;
                }
            }
        }

        let Some(transition) = selected else {
            debug!("no transition matched");
            self.emit(
                &iid,
                EventKind::EventUnhandled {
                    instance_id: Arc::clone(&iid),
                    event: event.to_string(),
                },
            );
            return Ok(TransitionOutcome::Unhandled);
        };
        let target_name = transition.def.target.clone();

        // Exit + transition actions run on a working copy; an abort
        // leaves the instance untouched
        let mut working = instance.context.clone();
        let exit_actions = current.def.on_exit.clone();
        if let Err(e) = self
            .run_actions(&exit_actions, &mut working, &root, &iid)
            .await
        {
            self.emit(
                &iid,
                EventKind::TransitionAborted {
                    instance_id: Arc::clone(&iid),
                    state: instance.current_state.clone(),
                    event: event.to_string(),
                    error: e.to_string(),
                },
            );
            return Ok(TransitionOutcome::Aborted {
                reason: e.to_string(),
            });
        }

        let transition_actions = transition.def.actions.clone();
        if let Err(e) = self
            .run_actions(&transition_actions, &mut working, &root, &iid)
            .await
        {
            self.emit(
                &iid,
                EventKind::TransitionAborted {
                    instance_id: Arc::clone(&iid),
                    state: instance.current_state.clone(),
                    event: event.to_string(),
                    error: e.to_string(),
                },
            );
            return Ok(TransitionOutcome::Aborted {
                reason: e.to_string(),
            });
        }

        // Commit point
        let from = instance.current_state.clone();
        instance.context = working;
        instance.commit_transition(event, &target_name, payload.clone());
        self.emit(
            &iid,
            EventKind::TransitionFired {
                instance_id: Arc::clone(&iid),
                from: from.clone(),
                event: event.to_string(),
                to: target_name.clone(),
            },
        );

        // Entry hooks: committed transition, failures only surface
        let target = self
            .states
            .get(&target_name)
            .expect("transition target validated");
        let enter_actions = target.def.on_enter.clone();
        let root = snapshot_root(&instance.context, event, &payload);
        let mut working = instance.context.clone();
        if let Err(e) = self
            .run_actions(&enter_actions, &mut working, &root, &iid)
            .await
        {
            self.emit(
                &iid,
                EventKind::OnEnterFailed {
                    instance_id: Arc::clone(&iid),
                    state: target_name.clone(),
                    error: e.to_string(),
                },
            );
        } else {
            instance.context = working;
        }

        if target.def.kind == StateKind::Final {
            instance.is_final = true;
            self.emit(
                &iid,
                EventKind::InstanceCompleted {
                    instance_id: Arc::clone(&iid),
                    state: target_name.clone(),
                },
            );
        }

        Ok(TransitionOutcome::Fired {
            from,
            to: target_name,
        })
    }

    fn emit(&self, instance_id: &str, kind: EventKind) {
        let event = self.events.emit(kind);
        self.emitter.publish(instance_id, event.kind.topic(), &event);
    }

    /// Run an action list against a working context copy. The first
    /// failure stops the sequence.
    async fn run_actions(
        &self,
        actions: &[ActionDef],
        context: &mut Value,
        root: &Value,
        instance_id: &Arc<str>,
    ) -> Result<()> {
        for action in actions {
            self.run_action(action, context, root, instance_id).await?;
        }
        Ok(())
    }

    // Returns an explicitly boxed future (rather than being an `async fn`)
    // to break the recursive opaque-type cycle: process_event → run_actions
    // → run_action → (timer) process_event.
    fn run_action<'a>(
        &'a self,
        action: &'a ActionDef,
        context: &'a mut Value,
        root: &'a Value,
        instance_id: &'a Arc<str>,
    ) -> futures::future::BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.run_action_inner(action, context, root, instance_id).await })
    }

    async fn run_action_inner(
        &self,
        action: &ActionDef,
        context: &mut Value,
        root: &Value,
        instance_id: &Arc<str>,
    ) -> Result<()> {
        match action {
            ActionDef::Log { message } => {
                let text = Template::parse(message)?.resolve(root)?;
                info!(instance_id = %instance_id, "{}", value_text(&text));
            }
            ActionDef::SetContext { path, value } => {
                let parsed = ContextPath::parse(path)?;
                let resolved = match value {
                    Value::String(raw) => Template::parse(raw)?.resolve(root)?,
                    other => other.clone(),
                };
                let mut tree = ExecutionContext::from_snapshot(context.clone());
                tree.set(&parsed, resolved)?;
                *context = tree.snapshot();
            }
            ActionDef::EmitEvent { name, payload } => {
                let event = self.events.emit(EventKind::CustomEvent {
                    instance_id: Arc::clone(instance_id),
                    name: name.clone(),
                    payload: payload.clone(),
                });
                self.emitter.publish(instance_id, name, &event);
            }
            ActionDef::InvokeAgent { agent_id, input } => {
                let mut resolved = serde_json::Map::new();
                for (alias, raw) in input {
                    resolved.insert(alias.clone(), Template::parse(raw)?.resolve(root)?);
                }
                let response = self
                    .agents
                    .invoke(
                        AgentRequest {
                            agent_id: agent_id.clone(),
                            input: Value::Object(resolved),
                            options: Value::Null,
                        },
                        &CancellationToken::new(),
                        Some(Instant::now() + self.action_timeout),
                    )
                    .await?;
                // Output lands under context.actions.<agent_id>
                let path = ContextPath::parse(&format!("actions.{}", agent_id))?;
                let mut tree = ExecutionContext::from_snapshot(context.clone());
                tree.set(&path, response.output)?;
                *context = tree.snapshot();
            }
            ActionDef::InvokeTool { tool_id, params } => {
                let mut resolved = serde_json::Map::new();
                for (alias, raw) in params {
                    resolved.insert(alias.clone(), Template::parse(raw)?.resolve(root)?);
                }
                let output = self
                    .tools
                    .invoke(
                        tool_id,
                        Value::Object(resolved),
                        &CancellationToken::new(),
                        Some(Instant::now() + self.action_timeout),
                    )
                    .await?;
                let path = ContextPath::parse(&format!("actions.{}", tool_id))?;
                let mut tree = ExecutionContext::from_snapshot(context.clone());
                tree.set(&path, output)?;
                *context = tree.snapshot();
            }
            ActionDef::TimerStart {
                id,
                delay_ms,
                event,
                payload,
            } => {
                let key = timer_key(instance_id, id);
                // Restarting a timer replaces the pending one
                if let Some((_, old)) = self.timers.remove(&key) {
                    old.abort();
                }
                let engine = self.clone();
                let instance_id = Arc::clone(instance_id);
                let event = event.clone();
                let payload = payload.clone();
                let delay = Duration::from_millis(*delay_ms);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    // Boxed to break the async type recursion
                    // process_event → timer → process_event
                    let fire: futures::future::BoxFuture<'_, Result<TransitionOutcome>> =
                        Box::pin(engine.process_event(&instance_id, &event, payload));
                    if let Err(e) = fire.await {
                        warn!(instance_id = %instance_id, event = %event, error = %e, "timer event failed");
                    }
                });
                self.timers.insert(key, handle);
            }
            ActionDef::TimerCancel { id } => {
                if let Some((_, handle)) = self.timers.remove(&timer_key(instance_id, id)) {
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}

fn timer_key(instance_id: &str, timer_id: &str) -> String {
    format!("{}::{}", instance_id, timer_id)
}

/// Snapshot seen by guards and action templates
fn snapshot_root(context: &Value, event: &str, payload: &Value) -> Value {
    json!({
        "context": context,
        "event": { "name": event, "payload": payload },
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
