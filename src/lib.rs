//! Strand - workflow execution core for AI agent pipelines
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  ast/       YAML/JSON → Rust types (WorkflowDef, NodeDef)    │
//! │  graph/     validated graph (GraphIndex, layers, Workflow)   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  runtime/   DAG execution (ExecutionEngine, invokers)        │
//! │  fsm/       state machines (FsmEngine, instances)            │
//! │  sched/     admission control (caps, priorities, permits)    │
//! │  context/   context tree, ${path} templates, conditions      │
//! │  saga/      compensation log + rollback                      │
//! │  resilience/ retry, circuit breaker, rate limit, policies    │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  store/     records + repos (memory reference impls)         │
//! │  event/     audit trail (EventLog, EventEmitter)             │
//! │  adapter/   agent/tool seams (mocks in-process)              │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`ast`] | Declarative workflow definitions (serde types) |
//! | [`graph`] | Validation report, indexed DAG, optimizer, compiled workflow |
//! | [`context`] | Context tree, `${path}` templates, condition grammar |
//! | [`sched`] | Priority queue, concurrency caps, rate-limited permits |
//! | [`runtime`] | DAG execution engine with control nodes and aggregation |
//! | [`fsm`] | Event-driven state machine engine |
//! | [`resilience`] | Retry backoff, circuit breaker, error-handler chain |
//! | [`saga`] | Compensation log and Saga rollback |
//! | [`event`] | Append-only audit events + bus emitter seam |
//! | [`store`] | Execution records, repo traits, in-memory impls |
//! | [`adapter`] | Agent/tool adapter seams with scriptable mocks |
//! | [`error`] | Error types with stable codes and fix suggestions |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strand::{ExecutionEngine, Workflow};
//!
//! let workflow = Workflow::from_yaml(&std::fs::read_to_string("flow.yaml")?)?;
//! let report = engine.execute(workflow, serde_json::json!({"val": 0})).await?;
//! println!("{}: {:?}", report.execution_id, report.status);
//! # Ok::<(), strand::StrandError>(())
//! ```

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL - declarative definitions and the execution graph
// ═══════════════════════════════════════════════════════════════
pub mod ast;
pub mod graph;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER - execution logic
// ═══════════════════════════════════════════════════════════════
pub mod context;
pub mod fsm;
pub mod resilience;
pub mod runtime;
pub mod saga;
pub mod sched;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER - storage, events, adapters
// ═══════════════════════════════════════════════════════════════
pub mod adapter;
pub mod event;
pub mod store;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING - error handling, configuration
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

// Error types
pub use error::{AgentErrorKind, ErrorKind, FixSuggestion, StrandError};

// Config types
pub use config::RuntimeConfig;

// Domain model
pub use ast::{NodeDef, NodeKind, StateDef, WorkflowDef, WorkflowDoc, WorkflowKind};
pub use graph::{validate, GraphIndex, ValidationReport, Workflow};

// Execution
pub use runtime::{
    ExecutionControl, ExecutionEngine, ExecutionReport, InvokerRegistry, NodeInvoker,
};

// State machines
pub use fsm::{FsmEngine, Instance, TransitionOutcome};

// Scheduling
pub use sched::{Scheduler, SchedulerConfig, TaskDescriptor};

// Events
pub use event::{Event, EventEmitter, EventKind, EventLog, MemoryEmitter, NoopEmitter};

// Store
pub use store::{
    ExecutionRecord, ExecutionRepo, ExecutionStatus, MemoryExecutionRepo, MemoryWorkflowRepo,
    NodeExecution, NodeStatus, WorkflowRepo,
};

// Adapters
pub use adapter::{AgentAdapter, MockAgentAdapter, MockToolAdapter, ToolAdapter};
