//! Context Module - execution context and expression evaluation
//!
//! The execution context is a nested key-value tree with well-known
//! top-level branches: `input`, `nodes.<id>.output`, `session`, `trigger`,
//! `meta`. Everything in this module is pure and non-suspending:
//! - `path`: dot/index paths (`a.b[0].c`) parsed once, resolved by walk
//! - `template`: `${path}` / `${path?}` substitution
//! - `condition`: small boolean/comparison grammar for guards and switches
//! - `tree`: the single-writer context tree with snapshot/merge

mod condition;
mod path;
mod template;
mod tree;

pub use condition::Condition;
pub use path::{ContextPath, Segment};
pub use template::{compile_bindings, resolve_bindings, Template};
pub use tree::ExecutionContext;
