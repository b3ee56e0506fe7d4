//! Event Module - audit trail for workflow execution
//!
//! Key types:
//! - `Event`: envelope with seq + timestamp + kind
//! - `EventKind`: lifecycle events (execution/node/fsm/compensation)
//! - `EventLog`: thread-safe, append-only log
//! - `EventEmitter`: external bus seam (`NoopEmitter`, `MemoryEmitter`)

mod emitter;
mod log;

pub use emitter::{EventEmitter, MemoryEmitter, NoopEmitter};
pub use log::{Event, EventKind, EventLog};
