//! Shared test harness: engine wired to mock adapters and memory repos

use std::sync::Arc;

use strand::adapter::{MockAgentAdapter, MockToolAdapter};
use strand::event::MemoryEmitter;
use strand::graph::Workflow;
use strand::resilience::{BreakerRegistry, CircuitBreakerConfig};
use strand::runtime::{EngineDefaults, ExecutionEngine, InvokerRegistry};
use strand::sched::{Scheduler, SchedulerConfig};
use strand::store::{MemoryExecutionRepo, MemoryWorkflowRepo};

pub struct Harness {
    pub engine: ExecutionEngine,
    pub agents: Arc<MockAgentAdapter>,
    pub tools: Arc<MockToolAdapter>,
    pub workflows: Arc<MemoryWorkflowRepo>,
    pub executions: Arc<MemoryExecutionRepo>,
    pub emitter: Arc<MemoryEmitter>,
    pub scheduler: Scheduler,
}

pub fn harness() -> Harness {
    harness_with(SchedulerConfig::default(), CircuitBreakerConfig::default())
}

pub fn harness_with(
    scheduler: SchedulerConfig,
    breakers: CircuitBreakerConfig,
) -> Harness {
    let agents = Arc::new(MockAgentAdapter::new());
    let tools = Arc::new(MockToolAdapter::new());
    let workflows = Arc::new(MemoryWorkflowRepo::new());
    let executions = Arc::new(MemoryExecutionRepo::new());
    let emitter = Arc::new(MemoryEmitter::new());
    let sched = Scheduler::new(scheduler);

    let engine = ExecutionEngine::new(
        Arc::clone(&workflows) as _,
        Arc::clone(&executions) as _,
        sched.clone(),
        Arc::new(InvokerRegistry::new(
            Arc::clone(&agents) as _,
            Arc::clone(&tools) as _,
        )),
        Arc::clone(&tools) as _,
        Arc::clone(&emitter) as _,
        Arc::new(BreakerRegistry::new(breakers)),
        EngineDefaults::default(),
    );

    Harness {
        engine,
        agents,
        tools,
        workflows,
        executions,
        emitter,
        scheduler: sched,
    }
}

pub fn compile(yaml: &str) -> Arc<Workflow> {
    Workflow::from_yaml(yaml).expect("test workflow compiles")
}
