//! Scheduler Module - task admission control
//!
//! - `queue`: priority queue `(priority desc, enqueue seq asc)`
//! - `scheduler`: concurrency caps + rate limits with RAII permits
//!
//! The execution engine asks for a `SchedulePermit` before every node
//! invocation; the permit's drop releases all held slots atomically.

mod queue;
mod scheduler;

pub use queue::PriorityQueue;
pub use scheduler::{SchedulePermit, Scheduler, SchedulerConfig, TaskDescriptor};
