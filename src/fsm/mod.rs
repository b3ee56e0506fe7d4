//! FSM Module - event-driven state machine execution
//!
//! - `instance`: running machine state (current state, context, history)
//! - `engine`: event intake, guard evaluation, exit/transition/enter
//!   action sequence, timers
//!
//! Actions go through the same agent/tool adapters as DAG nodes.

mod engine;
mod instance;

pub use engine::{FsmEngine, TransitionOutcome};
pub use instance::{Instance, TransitionRecord};
