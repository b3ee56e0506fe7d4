//! Execution Context Tree - single-writer nested key-value store
//!
//! One context per execution, mutated only by the engine coordinating
//! that execution. Node invocations receive immutable snapshots; their
//! outputs are merged back by the engine (single writer, no tree locks).
//!
//! Well-known branches:
//! - `input`: immutable per execution
//! - `nodes.<id>.output`: committed node outputs
//! - `session`: cross-node scratch space
//! - `trigger`: what started the execution
//! - `meta`: execution metadata (ids, workflow name/version)

use serde_json::{json, Value};

use crate::error::StrandError;

use super::path::{ContextPath, Segment};

/// The nested key-value tree carrying data across an execution
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    root: Value,
}

impl ExecutionContext {
    /// Create a context with the standard branches
    pub fn new(input: Value, trigger: Value, meta: Value) -> Self {
        Self {
            root: json!({
                "input": input,
                "nodes": {},
                "session": {},
                "trigger": trigger,
                "meta": meta,
            }),
        }
    }

    /// Restore a context from a persisted snapshot
    pub fn from_snapshot(root: Value) -> Self {
        Self { root }
    }

    /// Immutable snapshot for node input resolution and guard evaluation.
    ///
    /// The snapshot is consistent by construction: outputs are merged by
    /// the single-writer engine before successors are considered ready.
    pub fn snapshot(&self) -> Value {
        self.root.clone()
    }

    /// Borrow the tree for read-only resolution without cloning
    pub fn root(&self) -> &Value {
        &self.root
    }

    /// Commit a node's output under `nodes.<id>.output`
    pub fn merge_node_output(&mut self, node_id: &str, output: Value) {
        let nodes = self
            .root
            .as_object_mut()
            .expect("context root is an object")
            .entry("nodes")
            .or_insert_with(|| json!({}));
        if let Some(map) = nodes.as_object_mut() {
            map.insert(node_id.to_string(), json!({ "output": output }));
        }
    }

    /// Read a subtree by parsed path
    pub fn get(&self, path: &ContextPath) -> Option<&Value> {
        path.resolve(&self.root)
    }

    /// Write a value at a path, creating intermediate objects.
    ///
    /// Writing through an array index requires the array element to
    /// exist; only object intermediates are created.
    pub fn set(&mut self, path: &ContextPath, value: Value) -> Result<(), StrandError> {
        let segments = path.segments();
        if segments.is_empty() {
            return Err(StrandError::Internal {
                reason: "cannot set the context root".to_string(),
            });
        }

        let mut current = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            current = match segment {
                Segment::Key(k) => {
                    if !current.is_object() {
                        return Err(StrandError::InvalidTraversal {
                            segment: k.clone(),
                            value_type: type_name(current).to_string(),
                            full_path: path.raw().to_string(),
                        });
                    }
                    current
                        .as_object_mut()
                        .unwrap()
                        .entry(k.clone())
                        .or_insert_with(|| json!({}))
                }
                Segment::Index(i) => current.get_mut(*i).ok_or_else(|| {
                    StrandError::PathNotFound {
                        path: path.raw().to_string(),
                    }
                })?,
            };
        }

        match segments.last().unwrap() {
            Segment::Key(k) => {
                if !current.is_object() {
                    return Err(StrandError::InvalidTraversal {
                        segment: k.clone(),
                        value_type: type_name(current).to_string(),
                        full_path: path.raw().to_string(),
                    });
                }
                current.as_object_mut().unwrap().insert(k.clone(), value);
            }
            Segment::Index(i) => {
                let slot = current.get_mut(*i).ok_or_else(|| StrandError::PathNotFound {
                    path: path.raw().to_string(),
                })?;
                *slot = value;
            }
        }
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_has_standard_branches() {
        let ctx = ExecutionContext::new(json!({"val": 1}), json!({"type": "manual"}), json!({}));
        let snap = ctx.snapshot();
        assert_eq!(snap["input"]["val"], 1);
        assert_eq!(snap["trigger"]["type"], "manual");
        assert!(snap["nodes"].is_object());
        assert!(snap["session"].is_object());
    }

    #[test]
    fn merge_node_output_is_visible() {
        let mut ctx = ExecutionContext::new(json!({}), json!({}), json!({}));
        ctx.merge_node_output("fetch", json!({"body": "hello"}));

        let path = ContextPath::parse("nodes.fetch.output.body").unwrap();
        assert_eq!(ctx.get(&path).unwrap(), "hello");
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut ctx = ExecutionContext::new(json!({}), json!({}), json!({}));
        let path = ContextPath::parse("session.user.name").unwrap();
        ctx.set(&path, json!("ada")).unwrap();
        assert_eq!(ctx.get(&path).unwrap(), "ada");
    }

    #[test]
    fn set_through_primitive_fails() {
        let mut ctx = ExecutionContext::new(json!({"val": 5}), json!({}), json!({}));
        let path = ContextPath::parse("input.val.deeper").unwrap();
        let err = ctx.set(&path, json!(1)).unwrap_err();
        assert!(err.to_string().contains("STRAND-032"));
    }

    #[test]
    fn snapshot_is_decoupled_from_later_writes() {
        let mut ctx = ExecutionContext::new(json!({}), json!({}), json!({}));
        let snap = ctx.snapshot();
        ctx.merge_node_output("late", json!(1));
        assert!(snap["nodes"].get("late").is_none());
        assert!(ctx.snapshot()["nodes"].get("late").is_some());
    }

    #[test]
    fn from_snapshot_restores_state() {
        let mut ctx = ExecutionContext::new(json!({"v": 1}), json!({}), json!({}));
        ctx.merge_node_output("a", json!(10));
        let restored = ExecutionContext::from_snapshot(ctx.snapshot());
        let path = ContextPath::parse("nodes.a.output").unwrap();
        assert_eq!(restored.get(&path).unwrap(), 10);
    }
}
