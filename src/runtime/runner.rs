//! Execution Engine - drives DAG workflow lifecycles
//!
//! One engine instance serves many executions. Per execution it owns the
//! context tree (single writer), the node-execution records, and the
//! ready-set recomputation that follows every node completion. Node
//! invocations run as tokio tasks collected through a `JoinSet`; each
//! task exclusively owns its node-execution record for the duration of
//! the call.
//!
//! Control nodes:
//! - `switch`: pure, executed inline; losing branch heads are skipped
//! - `parallel`: inline no-op, successors fan out naturally
//! - `join`: inline; `wait_all` or `wait_any` over the watched set
//! - `loop`: spawned driver running body iterations sequentially, each
//!   iteration keyed `node_id[i]`
//!
//! Failure handling follows the node's retry policy first, then the
//! workflow's handler chain (skip / fallback / compensate / escalate).
//! Escalation cancels in-flight work, runs the Saga log when a
//! compensation plan is present, and fails the execution.

use std::sync::Arc;
use std::time::Instant;

use rustc_hash::FxHashMap;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::ToolAdapter;
use crate::ast::{
    ControlConfig, ControlKind, JoinMode, LoopKind, NodeDef, NodeKind, PolicyDef, RetryPolicyDef,
    WorkflowKind,
};
use crate::context::{resolve_bindings, ContextPath, ExecutionContext};
use crate::error::{Result, StrandError};
use crate::event::{Event, EventEmitter, EventKind, EventLog};
use crate::graph::Workflow;
use crate::resilience::{backoff_delay, should_retry, BreakerRegistry, HandlerChain};
use crate::saga::{CompensationLog, CompensationManager};
use crate::sched::{Scheduler, TaskDescriptor};
use crate::store::{
    ErrorInfo, ExecutionRecord, ExecutionRepo, ExecutionStatus, NodeExecution, NodeStatus,
    TriggerKind, WorkflowRepo,
};

use super::aggregate;
use super::audit::Auditor;
use super::executor::{invoke_with_deadline, InvokerRegistry};

/// Engine-wide defaults applied when a node leaves a knob unset
#[derive(Debug, Clone, Default)]
pub struct EngineDefaults {
    /// Timeout for nodes without `timeout_ms`
    pub node_timeout_ms: Option<u64>,
}

/// Cancel/suspend signals for one execution
#[derive(Clone, Default)]
pub struct ExecutionControl {
    cancel: CancellationToken,
    suspend: CancellationToken,
}

impl ExecutionControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the execution: in-flight nodes observe the token, pending
    /// nodes are marked cancelled.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain in-flight nodes, enqueue nothing new, persist for resume.
    pub fn suspend(&self) {
        self.suspend.cancel();
    }

    fn is_suspended(&self) -> bool {
        self.suspend.is_cancelled()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What the caller gets back from a finished (or suspended) execution
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub output: Option<Value>,
    pub error: Option<ErrorInfo>,
    pub events: Vec<Event>,
}

/// The DAG execution engine. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ExecutionEngine {
    workflows: Arc<dyn WorkflowRepo>,
    executions: Arc<dyn ExecutionRepo>,
    scheduler: Scheduler,
    invokers: Arc<InvokerRegistry>,
    tools: Arc<dyn ToolAdapter>,
    emitter: Arc<dyn EventEmitter>,
    breakers: Arc<BreakerRegistry>,
    defaults: EngineDefaults,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workflows: Arc<dyn WorkflowRepo>,
        executions: Arc<dyn ExecutionRepo>,
        scheduler: Scheduler,
        invokers: Arc<InvokerRegistry>,
        tools: Arc<dyn ToolAdapter>,
        emitter: Arc<dyn EventEmitter>,
        breakers: Arc<BreakerRegistry>,
        defaults: EngineDefaults,
    ) -> Self {
        Self {
            workflows,
            executions,
            scheduler,
            invokers,
            tools,
            emitter,
            breakers,
            defaults,
        }
    }

    /// Execute a workflow to a terminal state with default controls
    pub async fn execute(&self, workflow: Arc<Workflow>, input: Value) -> Result<ExecutionReport> {
        self.execute_controlled(
            workflow,
            input,
            TriggerKind::Manual,
            ExecutionControl::new(),
            None,
        )
        .await
    }

    /// Execute with explicit trigger, control handles and parent link
    #[instrument(skip_all, fields(workflow = %workflow.name()))]
    pub async fn execute_controlled(
        &self,
        workflow: Arc<Workflow>,
        input: Value,
        trigger: TriggerKind,
        control: ExecutionControl,
        parent_execution_id: Option<String>,
    ) -> Result<ExecutionReport> {
        if workflow.def.kind != WorkflowKind::Dag {
            return Err(StrandError::Validation {
                reason: "state-machine workflows run on the FsmEngine".to_string(),
            });
        }

        let mut record = ExecutionRecord::new(
            workflow.name(),
            workflow.version(),
            input.clone(),
            trigger,
        );
        record.parent_execution_id = parent_execution_id;
        let execution_id: Arc<str> = Arc::from(record.execution_id.as_str());
        self.executions.create(record.clone()).await?;

        let auditor = Auditor::new(
            Arc::clone(&execution_id),
            EventLog::new(),
            Arc::clone(&self.emitter),
            Arc::clone(&self.executions),
        );
        auditor
            .emit(EventKind::ExecutionCreated {
                workflow: workflow.name().to_string(),
                version: workflow.version().to_string(),
                node_count: workflow.def.nodes.len(),
            })
            .await;

        // Top-level node records; loop bodies get per-iteration records,
        // detached fallback nodes run only on policy dispatch
        let mut node_execs: FxHashMap<Arc<str>, NodeExecution> = FxHashMap::default();
        for node in &workflow.def.nodes {
            if workflow.is_loop_member(&node.id) || workflow.is_detached_fallback(&node.id) {
                continue;
            }
            let ne = NodeExecution::new(execution_id.to_string(), node.id.clone());
            if let Err(e) = self.executions.append_node_exec(ne.clone()).await {
                warn!(node_id = %node.id, error = %e, "failed to persist node execution");
            }
            node_execs.insert(Arc::from(node.id.as_str()), ne);
        }

        record.transition(ExecutionStatus::Running)?;
        self.executions.update(record.clone()).await?;
        auditor.emit(EventKind::ExecutionStarted).await;

        let context = ExecutionContext::new(
            input,
            serde_json::to_value(trigger).unwrap_or(Value::Null),
            json!({
                "execution_id": execution_id.as_ref(),
                "workflow": workflow.name(),
                "version": workflow.version(),
            }),
        );

        let run = Run {
            engine: self.clone(),
            workflow,
            record,
            context,
            node_execs,
            control,
            auditor,
            chain: Arc::new(HandlerChain::default()),
            comp_log: CompensationLog::new(),
            join_set: JoinSet::new(),
            failure: None,
            compensate: false,
        };
        run.drive().await
    }

    /// Resume a suspended execution. Idempotent: resuming an execution
    /// that is not suspended returns its current state untouched.
    pub async fn resume(
        &self,
        execution_id: &str,
        control: ExecutionControl,
    ) -> Result<ExecutionReport> {
        let snapshot = self.executions.load_execution(execution_id).await?;
        let mut record = snapshot.record;

        if record.status != ExecutionStatus::Suspended {
            return Ok(ExecutionReport {
                execution_id: record.execution_id.clone(),
                status: record.status,
                output: record.output.clone(),
                error: record.error.clone(),
                events: snapshot.events,
            });
        }

        let workflow = self
            .workflows
            .load_by_name_version(&record.workflow_name, &record.workflow_version)
            .await?;

        let context = match record.context_snapshot.clone() {
            Some(root) => ExecutionContext::from_snapshot(root),
            None => ExecutionContext::new(record.input.clone(), Value::Null, Value::Null),
        };

        // Re-derive node states: terminal records survive, anything
        // in-flight at crash/suspend time starts over
        let mut node_execs: FxHashMap<Arc<str>, NodeExecution> = FxHashMap::default();
        for ne in snapshot.node_execs {
            // Iteration records (`id[i]`) stay history-only
            if ne.node_id.contains('[') {
                continue;
            }
            let key: Arc<str> = Arc::from(ne.node_id.as_str());
            if ne.status.is_terminal() {
                node_execs.insert(key, ne);
            } else {
                let fresh = NodeExecution::new(execution_id.to_string(), ne.node_id.clone());
                if let Err(e) = self.executions.append_node_exec(fresh.clone()).await {
                    warn!(node_id = %fresh.node_id, error = %e, "failed to persist node execution");
                }
                node_execs.insert(key, fresh);
            }
        }
        for node in &workflow.def.nodes {
            if workflow.is_loop_member(&node.id)
                || workflow.is_detached_fallback(&node.id)
                || node_execs.contains_key(node.id.as_str())
            {
                continue;
            }
            let ne = NodeExecution::new(execution_id.to_string(), node.id.clone());
            node_execs.insert(Arc::from(node.id.as_str()), ne);
        }

        record.transition(ExecutionStatus::Running)?;
        self.executions.update(record.clone()).await?;

        let next_seq = snapshot.events.last().map(|e| e.seq + 1).unwrap_or(0);
        let auditor = Auditor::new(
            Arc::from(execution_id),
            EventLog::with_start_seq(next_seq),
            Arc::clone(&self.emitter),
            Arc::clone(&self.executions),
        );
        auditor.emit(EventKind::ExecutionResumed).await;

        let run = Run {
            engine: self.clone(),
            workflow,
            record,
            context,
            node_execs,
            control,
            auditor,
            chain: Arc::new(HandlerChain::default()),
            comp_log: CompensationLog::new(),
            join_set: JoinSet::new(),
            failure: None,
            compensate: false,
        };
        run.drive().await
    }

    async fn persist_node(&self, ne: &NodeExecution) {
        if let Err(e) = self.executions.update_node_exec(ne.clone()).await {
            warn!(node_id = %ne.node_id, error = %e, "failed to persist node execution");
        }
    }
}

/// Resource keys a node holds (per-resource caps, rate limits, breaker)
fn resource_keys(node: &NodeDef) -> Vec<String> {
    match &node.kind {
        NodeKind::Agent { agent } => vec![format!("agent:{}", agent.agent_id)],
        NodeKind::Tool { tool } => vec![format!("tool:{}", tool.tool_id)],
        _ => Vec::new(),
    }
}

/// Result of one spawned node task
struct NodeOutcome {
    node_id: Arc<str>,
    node_exec: NodeExecution,
    result: std::result::Result<Value, StrandError>,
    /// Policy decided by the handler chain for a terminal failure
    decision: Option<PolicyDef>,
}

/// How a failing attempt proceeds
enum RetryDecision {
    Retry(std::time::Duration),
    Give(Option<PolicyDef>),
}

fn decide_retry(
    node_retry: Option<&RetryPolicyDef>,
    chain: &HandlerChain,
    node_id: &str,
    error: &StrandError,
    attempt: u32,
) -> RetryDecision {
    // Node-local policy takes precedence over global handlers
    if let Some(policy) = node_retry {
        if should_retry(policy, error, attempt) {
            return RetryDecision::Retry(backoff_delay(policy, attempt));
        }
        // Exhausted or ineligible: a matching non-retry handler may
        // still recover the node
        return match chain.resolve(node_id, error) {
            Some(PolicyDef::Retry(_)) | None => RetryDecision::Give(None),
            Some(other) => RetryDecision::Give(Some(other.clone())),
        };
    }

    match chain.resolve(node_id, error) {
        Some(PolicyDef::Retry(policy)) => {
            if should_retry(policy, error, attempt) {
                RetryDecision::Retry(backoff_delay(policy, attempt))
            } else {
                RetryDecision::Give(None)
            }
        }
        Some(other) => RetryDecision::Give(Some(other.clone())),
        None => RetryDecision::Give(None),
    }
}

/// Whether a failure counts against the resource's circuit breaker
fn counts_for_breaker(error: &StrandError) -> bool {
    matches!(
        error.kind(),
        crate::error::ErrorKind::Agent
            | crate::error::ErrorKind::Tool
            | crate::error::ErrorKind::Timeout
    )
}

/// Run the attempt loop for one node: scheduler admission, circuit
/// breaker gate, deadline racing, retry with backoff. On success the
/// record is committed `success`; on cancellation it is committed
/// `cancelled`; on terminal failure it is LEFT `running` so the caller
/// can apply the policy decision (skip keeps a failed node out of the
/// `failed` state).
#[allow(clippy::too_many_arguments)]
async fn invoke_node_attempts(
    engine: &ExecutionEngine,
    workflow: &Arc<Workflow>,
    node: &NodeDef,
    ne: &mut NodeExecution,
    input: Value,
    cancel: &CancellationToken,
    auditor: &Auditor,
    chain: &HandlerChain,
) -> (std::result::Result<Value, StrandError>, Option<PolicyDef>) {
    let node_id: Arc<str> = Arc::from(ne.node_id.as_str());

    let descriptor = TaskDescriptor {
        node_id: Arc::clone(&node_id),
        kind: node.kind_name(),
        resource_keys: resource_keys(node),
        priority: node.priority,
    };
    let permit = match engine.scheduler.acquire(descriptor, cancel).await {
        Ok(permit) => permit,
        Err(e) => {
            let cancelled = matches!(e, StrandError::Cancelled { .. });
            if cancelled && ne.transition(NodeStatus::Cancelled).is_ok() {
                auditor
                    .emit(EventKind::NodeCancelled {
                        node_id: Arc::clone(&node_id),
                    })
                    .await;
                engine.persist_node(ne).await;
            }
            return (Err(e), None);
        }
    };

    ne.input = Some(input.clone());
    if ne.status == NodeStatus::Ready {
        if let Err(e) = ne.transition(NodeStatus::Running) {
            return (Err(e), None);
        }
    }
    engine.persist_node(ne).await;

    let timeout_ms = node.timeout_ms.or(engine.defaults.node_timeout_ms);
    let breaker_key = resource_keys(node).into_iter().next();
    let mut attempt: u32 = 1;

    let result = loop {
        ne.attempts.push(crate::store::AttemptRecord {
            attempt,
            error: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
        });
        auditor
            .emit(EventKind::NodeStarted {
                node_id: Arc::clone(&node_id),
                input: input.clone(),
                attempt,
            })
            .await;
        let started = Instant::now();

        let breaker = breaker_key.as_deref().map(|k| engine.breakers.get(k));
        let attempt_result = match breaker.as_ref().map(|b| b.try_acquire()).unwrap_or(Ok(())) {
            Err(open) => Err(open),
            Ok(()) => {
                let r = match &node.kind {
                    NodeKind::SubWorkflow { sub } => {
                        run_sub_workflow(engine, node, sub, input.clone(), cancel, auditor).await
                    }
                    _ => match engine.invokers.get(node.kind_name()) {
                        Some(invoker) => {
                            invoke_with_deadline(&invoker, node, input.clone(), cancel, timeout_ms)
                                .await
                        }
                        None => Err(StrandError::Internal {
                            reason: format!("no executor registered for kind '{}'", node.kind_name()),
                        }),
                    },
                };
                if let Some(b) = &breaker {
                    match &r {
                        Ok(_) => b.record_success(),
                        Err(e) if counts_for_breaker(e) => b.record_failure(),
                        Err(_) => {}
                    }
                }
                r
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;
        if let Some(last) = ne.attempts.last_mut() {
            last.ended_at = Some(chrono::Utc::now());
            if let Err(e) = &attempt_result {
                last.error = Some(e.to_string());
            }
        }

        match attempt_result {
            Ok(output) => {
                auditor
                    .emit(EventKind::NodeCompleted {
                        node_id: Arc::clone(&node_id),
                        output: Arc::new(output.clone()),
                        duration_ms,
                    })
                    .await;
                break Ok(output);
            }
            Err(error) => {
                if matches!(error, StrandError::Cancelled { .. }) {
                    if ne.transition(NodeStatus::Cancelled).is_ok() {
                        auditor
                            .emit(EventKind::NodeCancelled {
                                node_id: Arc::clone(&node_id),
                            })
                            .await;
                        engine.persist_node(ne).await;
                    }
                    drop(permit);
                    return (Err(error), None);
                }

                match decide_retry(node.retry.as_ref(), chain, &ne.node_id, &error, attempt) {
                    RetryDecision::Retry(delay) => {
                        auditor
                            .emit(EventKind::NodeRetrying {
                                node_id: Arc::clone(&node_id),
                                attempt,
                                delay_ms: delay.as_millis() as u64,
                                error: error.to_string(),
                            })
                            .await;
                        ne.retry_count += 1;
                        let _ = ne.transition(NodeStatus::Retrying);
                        engine.persist_node(ne).await;

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = cancel.cancelled() => {
                                if ne.transition(NodeStatus::Cancelled).is_ok() {
                                    auditor
                                        .emit(EventKind::NodeCancelled {
                                            node_id: Arc::clone(&node_id),
                                        })
                                        .await;
                                    engine.persist_node(ne).await;
                                }
                                drop(permit);
                                return (Err(StrandError::Cancelled {
                                    node_id: Some(ne.node_id.clone()),
                                }), None);
                            }
                        }
                        let _ = ne.transition(NodeStatus::Running);
                        attempt += 1;
                        continue;
                    }
                    RetryDecision::Give(decision) => {
                        auditor
                            .emit(EventKind::NodeFailed {
                                node_id: Arc::clone(&node_id),
                                error: error.to_string(),
                                retryable: error.is_retryable(),
                                duration_ms,
                            })
                            .await;
                        drop(permit);
                        return (Err(error), decision);
                    }
                }
            }
        }
    };

    drop(permit);

    match result {
        Ok(output) => {
            if let Err(e) = ne.finish_success(output.clone()) {
                return (Err(e), None);
            }
            engine.persist_node(ne).await;
            (Ok(output), None)
        }
        Err(e) => (Err(e), None),
    }
}

/// Sub-workflow nodes: nested execution with a linked cancel token and
/// the parent execution id recorded.
///
/// Returns an explicitly boxed future (rather than being an `async fn`)
/// to break the recursive opaque-type cycle engine → node → engine.
fn run_sub_workflow<'a>(
    engine: &'a ExecutionEngine,
    node: &'a NodeDef,
    sub: &'a crate::ast::SubWorkflowConfig,
    input: Value,
    cancel: &'a CancellationToken,
    auditor: &'a Auditor,
) -> futures::future::BoxFuture<'a, std::result::Result<Value, StrandError>> {
    Box::pin(async move {
        let nested = engine
            .workflows
            .load_by_name_version(&sub.workflow, &sub.workflow_version)
            .await?;

        let child_control = ExecutionControl {
            cancel: cancel.child_token(),
            suspend: CancellationToken::new(),
        };
        // Boxed to break the async type recursion engine → node → engine
        let nested_run: futures::future::BoxFuture<'_, Result<ExecutionReport>> =
            Box::pin(engine.execute_controlled(
                nested,
                input,
                TriggerKind::Event,
                child_control,
                Some(auditor.execution_id().to_string()),
            ));
        let report = nested_run.await?;

        match report.status {
            ExecutionStatus::Completed => Ok(report.output.unwrap_or(Value::Null)),
            ExecutionStatus::Cancelled => Err(StrandError::Cancelled {
                node_id: Some(node.id.clone()),
            }),
            status => Err(StrandError::NodeFailed {
                node_id: node.id.clone(),
                reason: format!("sub-workflow '{}' ended {}", sub.workflow, status),
            }),
        }
    })
}

/// State of one execution being driven to a terminal status
struct Run {
    engine: ExecutionEngine,
    workflow: Arc<Workflow>,
    record: ExecutionRecord,
    context: ExecutionContext,
    node_execs: FxHashMap<Arc<str>, NodeExecution>,
    control: ExecutionControl,
    auditor: Auditor,
    chain: Arc<HandlerChain>,
    comp_log: CompensationLog,
    join_set: JoinSet<NodeOutcome>,
    failure: Option<ErrorInfo>,
    compensate: bool,
}

impl Run {
    async fn drive(mut self) -> Result<ExecutionReport> {
        self.chain = Arc::new(HandlerChain::compile(&self.workflow.def.error_handlers)?);

        info!(
            execution_id = %self.record.execution_id,
            nodes = self.workflow.def.nodes.len(),
            "execution running"
        );

        self.dispatch_ready().await?;

        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok(outcome) => self.handle_outcome(outcome).await?,
                Err(e) => {
                    self.fail(
                        ErrorInfo::from(&StrandError::Internal {
                            reason: format!("node task panicked: {}", e),
                        }),
                        None,
                    );
                }
            }

            let stalled = self.failure.is_some()
                || self.control.is_cancelled()
                || self.control.is_suspended();
            if !stalled {
                self.dispatch_ready().await?;
            }
        }

        self.finalize().await
    }

    fn fail(&mut self, error: ErrorInfo, node_id: Option<Arc<str>>) {
        if self.failure.is_none() {
            let mut error = error;
            if error.node_id.is_none() {
                error.node_id = node_id.map(|n| n.to_string());
            }
            self.compensate = self.compensate || self.workflow.def.compensation.is_some();
            self.failure = Some(error);
        }
        self.control.cancel.cancel();
    }

    /// Fixpoint over readiness: mark skips, run inline control nodes,
    /// spawn everything else, until nothing changes.
    async fn dispatch_ready(&mut self) -> Result<()> {
        loop {
            let mut changed = false;

            let (ready, skipped) = match self.compute_ready() {
                Ok(sets) => sets,
                Err(e) => {
                    // Edge-condition evaluation failed: the graph cannot
                    // make a sound routing decision
                    self.fail(ErrorInfo::from(&e), None);
                    return Ok(());
                }
            };

            for (node_id, reason) in skipped {
                let ne = self
                    .node_execs
                    .get_mut(&node_id)
                    .expect("skipped node has a record");
                ne.transition(NodeStatus::Skipped)?;
                self.engine.persist_node(ne).await;
                self.auditor
                    .emit(EventKind::NodeSkipped {
                        node_id: Arc::clone(&node_id),
                        reason,
                    })
                    .await;
                changed = true;
            }

            for node_id in ready {
                changed = true;
                let deps: Vec<Arc<str>> = self
                    .workflow
                    .index
                    .dependencies(&node_id)
                    .to_vec();
                {
                    let ne = self
                        .node_execs
                        .get_mut(&node_id)
                        .expect("ready node has a record");
                    ne.transition(NodeStatus::Ready)?;
                }
                self.auditor
                    .emit(EventKind::NodeReady {
                        node_id: Arc::clone(&node_id),
                        dependencies: deps,
                    })
                    .await;

                let node = self
                    .workflow
                    .node(&node_id)
                    .expect("ready node is declared")
                    .clone();
                let dispatched = match &node.kind {
                    NodeKind::Control { control } if control.subtype != ControlKind::Loop => {
                        self.run_inline_control(&node_id, &node, control.clone()).await
                    }
                    NodeKind::Aggregation { aggregation } => {
                        self.run_inline_aggregation(&node_id, aggregation.clone()).await
                    }
                    _ => self.spawn_node(&node_id, node).await,
                };
                if let Err(e) = dispatched {
                    // Binding resolution or guard evaluation failed for
                    // this node: fail it without taking the engine down
                    self.fail_node(&node_id, e).await?;
                }
            }

            if !changed {
                return Ok(());
            }
        }
    }

    /// Fail one node with an engine-side error (bad binding, guard
    /// evaluation, invalid transition) and escalate.
    async fn fail_node(&mut self, node_id: &Arc<str>, error: StrandError) -> Result<()> {
        let info = ErrorInfo::from(&error);
        self.auditor
            .emit(EventKind::NodeFailed {
                node_id: Arc::clone(node_id),
                error: error.to_string(),
                retryable: error.is_retryable(),
                duration_ms: 0,
            })
            .await;
        if let Some(ne) = self.node_execs.get_mut(node_id) {
            if !ne.status.is_terminal() {
                let _ = ne.finish_failed(info.clone());
            }
        }
        self.persist(node_id).await;
        self.fail(info, Some(Arc::clone(node_id)));
        Ok(())
    }

    /// Nodes newly ready / newly skippable. Pure over current state.
    fn compute_ready(&self) -> Result<(Vec<Arc<str>>, Vec<(Arc<str>, String)>)> {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        let root = self.context.root();

        'nodes: for node in &self.workflow.def.nodes {
            if self.workflow.is_loop_member(&node.id) {
                continue;
            }
            let Some(ne) = self.node_execs.get(node.id.as_str()) else {
                continue;
            };
            if ne.status != NodeStatus::Waiting {
                continue;
            }
            let node_id: Arc<str> = Arc::from(node.id.as_str());
            let deps = self.workflow.index.dependencies(&node.id);

            // wait_any joins fire on the first watched success
            if let NodeKind::Control { control } = &node.kind {
                if control.subtype == ControlKind::Join && control.join == Some(JoinMode::WaitAny)
                {
                    let watched: Vec<&str> = if control.join_on.is_empty() {
                        deps.iter().map(|d| d.as_ref()).collect()
                    } else {
                        control.join_on.iter().map(|s| s.as_str()).collect()
                    };
                    let any_success = watched.iter().any(|w| {
                        self.node_execs
                            .get(*w)
                            .is_some_and(|n| n.status == NodeStatus::Success)
                    });
                    let all_terminal = watched.iter().all(|w| {
                        self.node_execs
                            .get(*w)
                            .is_some_and(|n| n.status.is_terminal())
                    });
                    if any_success {
                        ready.push(node_id);
                    } else if all_terminal {
                        skipped.push((node_id, "no watched node succeeded".to_string()));
                    }
                    continue;
                }
            }

            for dep in deps {
                let Some(dep_exec) = self.node_execs.get(dep.as_ref()) else {
                    continue 'nodes;
                };
                if !dep_exec.status.is_terminal() {
                    continue 'nodes;
                }
                // A failed or cancelled dependency stalls the successor;
                // the escalation path is already tearing the run down
                if matches!(dep_exec.status, NodeStatus::Failed | NodeStatus::Cancelled) {
                    continue 'nodes;
                }
            }

            if deps.is_empty() {
                ready.push(node_id);
                continue;
            }

            // Active when at least one incoming edge comes from a source
            // that produced an output: a success, or a policy-skip with
            // its default output. Branch-skips carry no output and stay
            // inactive, which is what cascades switch decisions.
            let mut active = false;
            for edge in self.workflow.index.incoming(&node.id) {
                let Some(src) = self.node_execs.get(edge.from.as_ref()) else {
                    continue;
                };
                let produces = src.status == NodeStatus::Success
                    || (src.status == NodeStatus::Skipped && src.output.is_some());
                if !produces {
                    continue;
                }
                match &edge.condition {
                    Some(condition) => {
                        if condition.eval(root)? {
                            active = true;
                            break;
                        }
                    }
                    None => {
                        active = true;
                        break;
                    }
                }
            }

            if active {
                ready.push(node_id);
            } else {
                skipped.push((node_id, "no active incoming edge".to_string()));
            }
        }

        Ok((ready, skipped))
    }

    /// Switch / parallel / join run inline: pure decisions over the
    /// context, no scheduler slots, no adapters.
    async fn run_inline_control(
        &mut self,
        node_id: &Arc<str>,
        node: &NodeDef,
        control: ControlConfig,
    ) -> Result<()> {
        let input = resolve_bindings(self.workflow.bindings(node_id), self.context.root())?;
        {
            let ne = self.node_execs.get_mut(node_id).expect("control record");
            ne.input = Some(input.clone());
            ne.transition(NodeStatus::Running)?;
        }
        self.auditor
            .emit(EventKind::NodeStarted {
                node_id: Arc::clone(node_id),
                input,
                attempt: 1,
            })
            .await;

        match control.subtype {
            ControlKind::Switch => {
                let mut chosen: Option<String> = None;
                for (condition, branch) in self.workflow.switch_cases(node_id) {
                    if condition.eval(self.context.root())? {
                        chosen = Some(branch.clone());
                        break;
                    }
                }
                if chosen.is_none() {
                    chosen = control.default_branch.clone();
                }

                let Some(branch) = chosen else {
                    let error = StrandError::UnmatchedBranch {
                        node_id: node.id.clone(),
                    };
                    self.auditor
                        .emit(EventKind::NodeFailed {
                            node_id: Arc::clone(node_id),
                            error: error.to_string(),
                            retryable: false,
                            duration_ms: 0,
                        })
                        .await;
                    let info = ErrorInfo::from(&error);
                    {
                        let ne = self.node_execs.get_mut(node_id).expect("control record");
                        ne.finish_failed(info.clone())?;
                    }
                    self.persist(node_id).await;
                    self.fail(info, Some(Arc::clone(node_id)));
                    return Ok(());
                };

                self.auditor
                    .emit(EventKind::BranchSelected {
                        node_id: Arc::clone(node_id),
                        branch: Some(branch.clone()),
                    })
                    .await;

                // Losing branch heads are skipped; descendants cascade
                let mut losers: Vec<&str> = control
                    .cases
                    .iter()
                    .map(|c| c.branch.as_str())
                    .collect();
                if let Some(default) = &control.default_branch {
                    losers.push(default.as_str());
                }
                for loser in losers {
                    if loser == branch {
                        continue;
                    }
                    let loser_id: Arc<str> = Arc::from(loser);
                    if let Some(ne) = self.node_execs.get_mut(&loser_id) {
                        if ne.status == NodeStatus::Waiting {
                            ne.transition(NodeStatus::Skipped)?;
                            self.engine.persist_node(ne).await;
                            self.auditor
                                .emit(EventKind::NodeSkipped {
                                    node_id: Arc::clone(&loser_id),
                                    reason: format!("branch not taken by switch '{}'", node.id),
                                })
                                .await;
                        }
                    }
                }

                self.commit_inline_success(node_id, json!({ "branch": branch })).await?;
            }
            ControlKind::Parallel => {
                // Fan-out is structural: successors become ready when
                // this node commits
                self.commit_inline_success(node_id, json!({})).await?;
            }
            ControlKind::Join => {
                let deps = self.workflow.index.dependencies(node_id);
                let watched: Vec<String> = if control.join_on.is_empty() {
                    deps.iter().map(|d| d.to_string()).collect()
                } else {
                    control.join_on.clone()
                };
                let mut merged = Map::new();
                for w in &watched {
                    if let Some(src) = self.node_execs.get(w.as_str()) {
                        if src.status == NodeStatus::Success {
                            merged.insert(
                                w.clone(),
                                src.output.clone().unwrap_or(Value::Null),
                            );
                        }
                    }
                }
                self.commit_inline_success(node_id, Value::Object(merged)).await?;
            }
            ControlKind::Loop => unreachable!("loop nodes are spawned"),
        }

        Ok(())
    }

    async fn run_inline_aggregation(
        &mut self,
        node_id: &Arc<str>,
        aggregation: crate::ast::AggregationConfig,
    ) -> Result<()> {
        let mut outputs: Vec<(String, Value)> = Vec::with_capacity(aggregation.sources.len());
        for source in &aggregation.sources {
            if let Some(src) = self.node_execs.get(source.as_str()) {
                if src.status == NodeStatus::Success {
                    outputs.push((source.clone(), src.output.clone().unwrap_or(Value::Null)));
                }
            }
        }

        let input = aggregate::merged_input(&outputs);
        {
            let ne = self.node_execs.get_mut(node_id).expect("aggregation record");
            ne.input = Some(input.clone());
            ne.transition(NodeStatus::Running)?;
        }
        self.auditor
            .emit(EventKind::NodeStarted {
                node_id: Arc::clone(node_id),
                input,
                attempt: 1,
            })
            .await;

        let output = aggregate::reduce(aggregation.reducer, &outputs);
        self.commit_inline_success(node_id, output).await?;
        Ok(())
    }

    async fn commit_inline_success(&mut self, node_id: &Arc<str>, output: Value) -> Result<()> {
        {
            let ne = self.node_execs.get_mut(node_id).expect("inline record");
            ne.finish_success(output.clone())?;
        }
        self.persist(node_id).await;
        self.auditor
            .emit(EventKind::NodeCompleted {
                node_id: Arc::clone(node_id),
                output: Arc::new(output.clone()),
                duration_ms: 0,
            })
            .await;
        self.context.merge_node_output(node_id, output);
        self.record_compensation(node_id).await?;
        Ok(())
    }

    async fn persist(&self, node_id: &Arc<str>) {
        if let Some(ne) = self.node_execs.get(node_id) {
            self.engine.persist_node(ne).await;
        }
    }

    /// Append the node's compensation entry on success commit
    async fn record_compensation(&mut self, node_id: &Arc<str>) -> Result<()> {
        let Some(node) = self.workflow.node(node_id) else {
            return Ok(());
        };
        let Some(comp) = &node.compensation else {
            return Ok(());
        };
        let input = resolve_bindings(
            self.workflow.compensation_inputs(node_id),
            self.context.root(),
        )?;
        self.comp_log
            .record(Arc::clone(node_id), comp.tool_id.clone(), input);
        Ok(())
    }

    /// Spawn an agent/tool/sub-workflow/loop node as a tokio task
    async fn spawn_node(&mut self, node_id: &Arc<str>, node: NodeDef) -> Result<()> {
        let input = resolve_bindings(self.workflow.bindings(node_id), self.context.root())?;
        let ne = self
            .node_execs
            .get(node_id)
            .expect("spawned node has a record")
            .clone();

        let engine = self.engine.clone();
        let workflow = Arc::clone(&self.workflow);
        let auditor = self.auditor.clone();
        let chain = Arc::clone(&self.chain);
        let cancel = self.control.cancel.clone();
        let id = Arc::clone(node_id);
        let snapshot = self.context.snapshot();

        self.join_set.spawn(async move {
            run_node_task(engine, workflow, node, ne, id, input, snapshot, cancel, auditor, chain)
                .await
        });
        Ok(())
    }

    /// Spawn the fallback node's action attributed to the failing node
    async fn spawn_fallback(
        &mut self,
        original: &Arc<str>,
        fallback_node: NodeDef,
        ne: NodeExecution,
    ) -> Result<()> {
        let input = resolve_bindings(
            self.workflow.bindings(&fallback_node.id),
            self.context.root(),
        )?;
        let engine = self.engine.clone();
        let workflow = Arc::clone(&self.workflow);
        let auditor = self.auditor.clone();
        let cancel = self.control.cancel.clone();
        let id = Arc::clone(original);
        let snapshot = self.context.snapshot();
        // The fallback itself gets no second-level recovery
        let chain = Arc::new(HandlerChain::default());

        self.join_set.spawn(async move {
            run_node_task(
                engine,
                workflow,
                fallback_node,
                ne,
                id,
                input,
                snapshot,
                cancel,
                auditor,
                chain,
            )
            .await
        });
        Ok(())
    }

    async fn handle_outcome(&mut self, outcome: NodeOutcome) -> Result<()> {
        let node_id = outcome.node_id;
        debug!(node_id = %node_id, ok = outcome.result.is_ok(), "node task finished");

        match outcome.result {
            Ok(output) => {
                self.node_execs.insert(Arc::clone(&node_id), outcome.node_exec);
                self.context.merge_node_output(&node_id, output);
                self.record_compensation(&node_id).await?;
            }
            Err(error) => {
                let mut ne = outcome.node_exec;
                match outcome.decision {
                    Some(PolicyDef::Skip { output }) => {
                        ne.output = Some(output.clone());
                        ne.transition(NodeStatus::Skipped)?;
                        self.engine.persist_node(&ne).await;
                        self.auditor
                            .emit(EventKind::NodeSkipped {
                                node_id: Arc::clone(&node_id),
                                reason: format!("skip policy after: {}", error),
                            })
                            .await;
                        self.node_execs.insert(Arc::clone(&node_id), ne);
                        self.context.merge_node_output(&node_id, output);
                    }
                    Some(PolicyDef::Fallback { node: Some(fallback), output: None }) => {
                        let fallback_node = self
                            .workflow
                            .node(&fallback)
                            .expect("fallback node validated")
                            .clone();
                        self.node_execs.insert(Arc::clone(&node_id), ne.clone());
                        self.spawn_fallback(&node_id, fallback_node, ne).await?;
                    }
                    Some(PolicyDef::Fallback { output: Some(output), .. }) => {
                        // Degrade to the declared default output
                        ne.finish_success(output.clone())?;
                        self.engine.persist_node(&ne).await;
                        self.auditor
                            .emit(EventKind::NodeCompleted {
                                node_id: Arc::clone(&node_id),
                                output: Arc::new(output.clone()),
                                duration_ms: 0,
                            })
                            .await;
                        self.node_execs.insert(Arc::clone(&node_id), ne);
                        self.context.merge_node_output(&node_id, output);
                    }
                    Some(PolicyDef::Compensate) => {
                        let info = ErrorInfo::from(&error);
                        ne.finish_failed(info.clone())?;
                        self.engine.persist_node(&ne).await;
                        self.node_execs.insert(Arc::clone(&node_id), ne);
                        self.compensate = true;
                        self.fail(info, Some(node_id));
                    }
                    // Escalate, an exhausted retry policy, or no handler
                    // at all: the failure stands
                    _ => {
                        if matches!(error, StrandError::Cancelled { .. }) {
                            // Already committed cancelled inside the task
                            self.node_execs.insert(Arc::clone(&node_id), ne);
                        } else {
                            let info = ErrorInfo::from(&error);
                            ne.finish_failed(info.clone())?;
                            self.engine.persist_node(&ne).await;
                            self.node_execs.insert(Arc::clone(&node_id), ne);
                            self.fail(info, Some(node_id));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Execution output: the committed outputs of final (sink) nodes
    fn final_output(&self) -> Value {
        let finals = self.workflow.index.finals();
        let mut outputs: Vec<(String, Value)> = Vec::new();
        for id in finals {
            if self.workflow.is_loop_member(&id) {
                continue;
            }
            if let Some(ne) = self.node_execs.get(&id) {
                if ne.status == NodeStatus::Success {
                    outputs.push((id.to_string(), ne.output.clone().unwrap_or(Value::Null)));
                }
            }
        }
        match outputs.len() {
            0 => Value::Null,
            1 => outputs.into_iter().next().unwrap().1,
            _ => Value::Object(outputs.into_iter().map(|(k, v)| (k, v)).collect()),
        }
    }

    async fn finalize(mut self) -> Result<ExecutionReport> {
        let started = self
            .record
            .started_at
            .map(|t| (chrono::Utc::now() - t).num_milliseconds().max(0) as u64)
            .unwrap_or(0);

        if let Some(error) = self.failure.clone() {
            if self.compensate && !self.comp_log.is_empty() {
                self.record.transition(ExecutionStatus::Compensating)?;
                self.engine.executions.update(self.record.clone()).await?;

                let plan = self.workflow.def.compensation.clone().unwrap_or_default();
                let manager = CompensationManager::new(Arc::clone(&self.engine.tools));
                // Rollback runs on its own token: cancelling the
                // execution must not abort the undo actions
                let report = manager
                    .run(&plan, &self.comp_log, &self.auditor, &CancellationToken::new())
                    .await;
                if !report.success {
                    warn!(
                        execution_id = %self.record.execution_id,
                        "compensation finished with failures"
                    );
                }
            }
            let failed_node = error.node_id.as_deref().map(Arc::from);
            self.record.transition(ExecutionStatus::Failed)?;
            self.record.error = Some(error.clone());
            self.engine.executions.update(self.record.clone()).await?;
            self.auditor
                .emit(EventKind::ExecutionFailed {
                    error: error.message.clone(),
                    failed_node,
                })
                .await;
            return Ok(self.report());
        }

        if self.control.is_cancelled() {
            // Pending nodes never ran: mark them cancelled
            let pending: Vec<Arc<str>> = self
                .node_execs
                .iter()
                .filter(|(_, ne)| {
                    matches!(ne.status, NodeStatus::Waiting | NodeStatus::Ready)
                })
                .map(|(id, _)| Arc::clone(id))
                .collect();
            for id in pending {
                if let Some(ne) = self.node_execs.get_mut(&id) {
                    ne.transition(NodeStatus::Cancelled)?;
                }
                self.persist(&id).await;
                self.auditor
                    .emit(EventKind::NodeCancelled { node_id: id })
                    .await;
            }
            self.record.transition(ExecutionStatus::Cancelled)?;
            self.engine.executions.update(self.record.clone()).await?;
            self.auditor.emit(EventKind::ExecutionCancelled).await;
            return Ok(self.report());
        }

        let unfinished = self
            .node_execs
            .values()
            .any(|ne| !ne.status.is_terminal());

        if unfinished {
            if self.control.is_suspended() {
                self.record.context_snapshot = Some(self.context.snapshot());
                self.record.transition(ExecutionStatus::Suspended)?;
                self.engine.executions.update(self.record.clone()).await?;
                self.auditor.emit(EventKind::ExecutionSuspended).await;
                return Ok(self.report());
            }
            // No failure, nothing running, nodes still waiting: the
            // graph cannot make progress
            let error = StrandError::Execution {
                reason: "deadlock: no nodes ready but execution not complete".to_string(),
            };
            let info = ErrorInfo::from(&error);
            self.record.transition(ExecutionStatus::Failed)?;
            self.record.error = Some(info);
            self.engine.executions.update(self.record.clone()).await?;
            self.auditor
                .emit(EventKind::ExecutionFailed {
                    error: error.to_string(),
                    failed_node: None,
                })
                .await;
            return Ok(self.report());
        }

        let output = self.final_output();
        self.record.output = Some(output.clone());
        self.record.transition(ExecutionStatus::Completed)?;
        self.engine.executions.update(self.record.clone()).await?;
        self.auditor
            .emit(EventKind::ExecutionCompleted {
                output: Arc::new(output),
                total_duration_ms: started,
            })
            .await;
        info!(execution_id = %self.record.execution_id, "execution completed");
        Ok(self.report())
    }

    fn report(&self) -> ExecutionReport {
        ExecutionReport {
            execution_id: self.record.execution_id.clone(),
            status: self.record.status,
            output: self.record.output.clone(),
            error: self.record.error.clone(),
            events: self.auditor.log().events(),
        }
    }
}

/// Body of a spawned node task
#[allow(clippy::too_many_arguments)]
async fn run_node_task(
    engine: ExecutionEngine,
    workflow: Arc<Workflow>,
    node: NodeDef,
    mut ne: NodeExecution,
    attribute_id: Arc<str>,
    input: Value,
    snapshot: Value,
    cancel: CancellationToken,
    auditor: Auditor,
    chain: Arc<HandlerChain>,
) -> NodeOutcome {
    if let NodeKind::Control { control } = &node.kind {
        if control.subtype == ControlKind::Loop {
            return run_loop_node(
                engine,
                workflow,
                node.clone(),
                control.clone(),
                ne,
                attribute_id,
                snapshot,
                cancel,
                auditor,
                chain,
            )
            .await;
        }
    }

    let (result, decision) = invoke_node_attempts(
        &engine, &workflow, &node, &mut ne, input, &cancel, &auditor, &chain,
    )
    .await;

    NodeOutcome {
        node_id: attribute_id,
        node_exec: ne,
        result,
        decision,
    }
}

/// Loop driver: iterations run sequentially; the body subgraph executes
/// in topological order with records keyed `node_id[i]`. Body outputs
/// stay loop-local; only the aggregate array is merged into the parent
/// context.
#[allow(clippy::too_many_arguments)]
async fn run_loop_node(
    engine: ExecutionEngine,
    workflow: Arc<Workflow>,
    node: NodeDef,
    control: ControlConfig,
    mut ne: NodeExecution,
    attribute_id: Arc<str>,
    base_snapshot: Value,
    cancel: CancellationToken,
    auditor: Auditor,
    chain: Arc<HandlerChain>,
) -> NodeOutcome {
    let spec = control.loop_spec.expect("loop node validated");

    let fail_outcome = |ne: NodeExecution, error: StrandError| NodeOutcome {
        node_id: Arc::clone(&attribute_id),
        node_exec: ne,
        result: Err(error),
        decision: None,
    };

    if let Err(e) = ne.transition(NodeStatus::Running) {
        return fail_outcome(ne, e);
    }
    engine.persist_node(&ne).await;
    auditor
        .emit(EventKind::NodeStarted {
            node_id: Arc::clone(&attribute_id),
            input: json!({ "loop": spec.body }),
            attempt: 1,
        })
        .await;

    // Body subgraph in topological order
    let body_order: Vec<Arc<str>> = workflow
        .layers
        .iter()
        .flatten()
        .filter(|id| spec.body.iter().any(|b| b == id.as_ref()))
        .cloned()
        .collect();

    let items: Option<Vec<Value>> = match spec.kind {
        LoopKind::ForEach => {
            let template = workflow
                .loop_items(&node.id)
                .expect("for_each loop validated");
            match template.resolve(&base_snapshot) {
                Ok(Value::Array(items)) => Some(items),
                Ok(other) => {
                    return fail_outcome(
                        ne,
                        StrandError::NodeFailed {
                            node_id: node.id.clone(),
                            reason: format!(
                                "for_each items resolved to {}, expected array",
                                type_of(&other)
                            ),
                        },
                    );
                }
                Err(e) => return fail_outcome(ne, e),
            }
        }
        _ => None,
    };

    let loop_path = match ContextPath::parse("loop") {
        Ok(p) => p,
        Err(e) => return fail_outcome(ne, e),
    };

    let mut outputs: Vec<Value> = Vec::new();
    let mut last = Value::Null;
    let mut index: u64 = 0;

    loop {
        if index >= spec.max_iterations {
            break;
        }
        match spec.kind {
            LoopKind::ForEach => {
                if index as usize >= items.as_ref().map_or(0, Vec::len) {
                    break;
                }
            }
            LoopKind::Count => {
                if index >= spec.count.unwrap_or(0) {
                    break;
                }
            }
            LoopKind::While => {
                let mut probe = base_snapshot.clone();
                if let Some(map) = probe.as_object_mut() {
                    map.insert(
                        "loop".to_string(),
                        json!({ "index": index, "last": last }),
                    );
                }
                let condition = workflow
                    .loop_condition(&node.id)
                    .expect("while loop validated");
                match condition.eval(&probe) {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => return fail_outcome(ne, e),
                }
            }
        }
        if cancel.is_cancelled() {
            let _ = ne.transition(NodeStatus::Cancelled);
            engine.persist_node(&ne).await;
            auditor
                .emit(EventKind::NodeCancelled {
                    node_id: Arc::clone(&attribute_id),
                })
                .await;
            return NodeOutcome {
                node_id: attribute_id,
                node_exec: ne,
                result: Err(StrandError::Cancelled {
                    node_id: Some(node.id.clone()),
                }),
                decision: None,
            };
        }

        // Iteration-local context: base snapshot + loop bindings
        let mut iter_ctx = ExecutionContext::from_snapshot(base_snapshot.clone());
        let mut loop_branch = Map::new();
        loop_branch.insert("index".to_string(), json!(index));
        loop_branch.insert("last".to_string(), last.clone());
        if let Some(items) = &items {
            loop_branch.insert(
                spec.item_var.clone(),
                items[index as usize].clone(),
            );
        }
        if let Err(e) = iter_ctx.set(&loop_path, Value::Object(loop_branch)) {
            return fail_outcome(ne, e);
        }

        let mut iteration_outputs: Vec<(String, Value)> = Vec::new();
        for body_id in &body_order {
            let body_node = workflow.node(body_id).expect("body node declared").clone();
            let keyed = format!("{}[{}]", body_id, index);
            let mut body_exec =
                NodeExecution::new(auditor.execution_id().to_string(), keyed);
            if let Err(e) = engine.executions.append_node_exec(body_exec.clone()).await {
                warn!(node_id = %body_exec.node_id, error = %e, "failed to persist node execution");
            }
            if let Err(e) = body_exec.transition(NodeStatus::Ready) {
                return fail_outcome(ne, e);
            }

            let body_input =
                match resolve_bindings(workflow.bindings(body_id), iter_ctx.root()) {
                    Ok(input) => input,
                    Err(e) => return fail_outcome(ne, e),
                };

            let (result, decision) = invoke_node_attempts(
                &engine,
                &workflow,
                &body_node,
                &mut body_exec,
                body_input,
                &cancel,
                &auditor,
                &chain,
            )
            .await;

            match result {
                Ok(output) => {
                    iter_ctx.merge_node_output(body_id, output.clone());
                    iteration_outputs.push((body_id.to_string(), output));
                }
                Err(error) => match decision {
                    Some(PolicyDef::Skip { output }) => {
                        body_exec.output = Some(output.clone());
                        let _ = body_exec.transition(NodeStatus::Skipped);
                        engine.persist_node(&body_exec).await;
                        iter_ctx.merge_node_output(body_id, output.clone());
                        iteration_outputs.push((body_id.to_string(), output));
                    }
                    _ => {
                        // A body failure fails the loop node
                        if !matches!(error, StrandError::Cancelled { .. }) {
                            let _ = body_exec.finish_failed(ErrorInfo::from(&error));
                            engine.persist_node(&body_exec).await;
                        }
                        return fail_outcome(ne, error);
                    }
                },
            }
        }

        let iteration_output = match iteration_outputs.len() {
            0 => Value::Null,
            1 => iteration_outputs.into_iter().next().unwrap().1,
            _ => Value::Object(iteration_outputs.into_iter().collect()),
        };
        last = iteration_output.clone();
        outputs.push(iteration_output);
        index += 1;
    }

    let output = Value::Array(outputs);
    if let Err(e) = ne.finish_success(output.clone()) {
        return fail_outcome(ne, e);
    }
    engine.persist_node(&ne).await;
    auditor
        .emit(EventKind::NodeCompleted {
            node_id: Arc::clone(&attribute_id),
            output: Arc::new(output.clone()),
            duration_ms: 0,
        })
        .await;

    NodeOutcome {
        node_id: attribute_id,
        node_exec: ne,
        result: Ok(output),
        decision: None,
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
