//! Graph Module - validated, indexed, optimized workflows
//!
//! The pipeline from declaration to execution graph:
//! - `validate`: structural invariants collected into a report
//! - `index`: GraphIndex with adjacency/predecessor maps and cycle check
//! - `optimize`: topological layers and parallel-eligible groups
//!
//! `Workflow` ties these together with templates and conditions parsed
//! once at compile, so the engine never re-parses expressions.

mod index;
mod optimize;
mod validate;

pub use index::{DepVec, GraphIndex, IncomingEdge};
pub use optimize::{parallel_groups, topo_layers, ParallelGroup};
pub use validate::{validate, Severity, ValidationIssue, ValidationReport};

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use uuid::Uuid;

use crate::ast::{NodeDef, NodeKind, WorkflowDef};
use crate::context::{Condition, Template};
use crate::error::{Result, StrandError};

/// A validated workflow with its execution graph and pre-parsed
/// expressions. Immutable once compiled; shared via `Arc`.
pub struct Workflow {
    pub id: String,
    pub def: WorkflowDef,
    pub index: GraphIndex,
    pub layers: Vec<Vec<Arc<str>>>,
    pub groups: Vec<ParallelGroup>,
    bindings: FxHashMap<Arc<str>, Vec<(String, Template)>>,
    switch_cases: FxHashMap<Arc<str>, Vec<(Condition, String)>>,
    loop_conditions: FxHashMap<Arc<str>, Condition>,
    loop_items: FxHashMap<Arc<str>, Template>,
    comp_inputs: FxHashMap<Arc<str>, Vec<(String, Template)>>,
    loop_members: FxHashSet<Arc<str>>,
    detached_fallbacks: FxHashSet<Arc<str>>,
}

impl Workflow {
    /// Validate and compile a definition into an executable workflow.
    ///
    /// Fails with a collapsed `Validation` error when the report has
    /// errors; call `validate` directly for the full report.
    pub fn compile(def: WorkflowDef) -> Result<Arc<Self>> {
        let report = validate(&def);
        if let Some(err) = report.into_error() {
            return Err(err);
        }

        let index = GraphIndex::from_def(&def)?;
        let layers = topo_layers(&index);
        let groups = parallel_groups(&index, &layers);

        let mut bindings = FxHashMap::default();
        let mut switch_cases = FxHashMap::default();
        let mut loop_conditions = FxHashMap::default();
        let mut loop_items = FxHashMap::default();
        let mut comp_inputs = FxHashMap::default();
        let mut loop_members = FxHashSet::default();

        for node in &def.nodes {
            let id: Arc<str> = Arc::from(node.id.as_str());

            if !node.inputs.is_empty() {
                bindings.insert(
                    Arc::clone(&id),
                    crate::context::compile_bindings(&node.inputs)?,
                );
            }

            if let Some(comp) = &node.compensation {
                comp_inputs.insert(
                    Arc::clone(&id),
                    crate::context::compile_bindings(&comp.input)?,
                );
            }

            if let NodeKind::Control { control } = &node.kind {
                if !control.cases.is_empty() {
                    let mut compiled = Vec::with_capacity(control.cases.len());
                    for case in &control.cases {
                        compiled.push((Condition::parse(&case.when)?, case.branch.clone()));
                    }
                    switch_cases.insert(Arc::clone(&id), compiled);
                }
                if let Some(spec) = &control.loop_spec {
                    if let Some(raw) = &spec.condition {
                        loop_conditions.insert(Arc::clone(&id), Condition::parse(raw)?);
                    }
                    if let Some(raw) = &spec.items {
                        loop_items.insert(Arc::clone(&id), Template::parse(raw)?);
                    }
                    for body in &spec.body {
                        loop_members.insert(Arc::from(body.as_str()));
                    }
                }
            }
        }

        // Fallback targets disconnected from the graph never enter the
        // top-level ready set; they run only when a fallback policy
        // dispatches them
        let mut detached_fallbacks = FxHashSet::default();
        for handler in &def.error_handlers {
            if let crate::ast::PolicyDef::Fallback {
                node: Some(target), ..
            } = &handler.policy
            {
                if index.dependencies(target).is_empty() && index.successors(target).is_empty() {
                    detached_fallbacks.insert(Arc::from(target.as_str()));
                }
            }
        }

        let id = def
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Ok(Arc::new(Self {
            id,
            def,
            index,
            layers,
            groups,
            bindings,
            switch_cases,
            loop_conditions,
            loop_items,
            comp_inputs,
            loop_members,
            detached_fallbacks,
        }))
    }

    /// Parse a YAML or JSON document and compile it
    pub fn from_yaml(text: &str) -> Result<Arc<Self>> {
        let doc: crate::ast::WorkflowDoc =
            serde_yaml::from_str(text).map_err(|e| StrandError::ParseError {
                details: e.to_string(),
            })?;
        Self::compile(doc.workflow)
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn version(&self) -> &str {
        &self.def.version
    }

    /// Look up a node definition by id
    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.def.node(id)
    }

    /// Compiled input bindings of a node, sorted by alias
    pub fn bindings(&self, node_id: &str) -> &[(String, Template)] {
        self.bindings.get(node_id).map_or(&[], Vec::as_slice)
    }

    /// Compiled switch cases of a control node
    pub fn switch_cases(&self, node_id: &str) -> &[(Condition, String)] {
        self.switch_cases.get(node_id).map_or(&[], Vec::as_slice)
    }

    /// Compiled `while` condition of a loop node
    pub fn loop_condition(&self, node_id: &str) -> Option<&Condition> {
        self.loop_conditions.get(node_id)
    }

    /// Compiled `items` template of a `for_each` loop node
    pub fn loop_items(&self, node_id: &str) -> Option<&Template> {
        self.loop_items.get(node_id)
    }

    /// Compiled compensation input bindings of a node
    pub fn compensation_inputs(&self, node_id: &str) -> &[(String, Template)] {
        self.comp_inputs.get(node_id).map_or(&[], Vec::as_slice)
    }

    /// True when the node belongs to some loop's body (excluded from the
    /// top-level ready set)
    pub fn is_loop_member(&self, node_id: &str) -> bool {
        self.loop_members.contains(node_id)
    }

    /// True when the node only runs as a fallback target (dependency-free
    /// fallback node, excluded from the top-level ready set)
    pub fn is_detached_fallback(&self, node_id: &str) -> bool {
        self.detached_fallbacks.contains(node_id)
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("id", &self.id)
            .field("name", &self.def.name)
            .field("version", &self.def.version)
            .field("nodes", &self.def.nodes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_valid_workflow() {
        let workflow = Workflow::from_yaml(
            r#"
workflow:
  name: demo
  version: "1"
  nodes:
    - { id: a, type: tool, tool_id: t }
    - id: b
      type: tool
      tool_id: t
      dependencies: [a]
      inputs:
        prev: "${nodes.a.output}"
"#,
        )
        .unwrap();

        assert_eq!(workflow.name(), "demo");
        assert_eq!(workflow.bindings("b").len(), 1);
        assert_eq!(workflow.layers.len(), 2);
    }

    #[test]
    fn compile_rejects_invalid_workflow() {
        let err = Workflow::from_yaml(
            r#"
workflow:
  name: bad
  nodes:
    - { id: a, type: tool, tool_id: t, dependencies: [ghost] }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("STRAND-010"));
    }

    #[test]
    fn compile_collects_switch_cases() {
        let workflow = Workflow::from_yaml(
            r#"
workflow:
  name: switchy
  nodes:
    - { id: classify, type: tool, tool_id: t }
    - id: route
      type: control
      subtype: switch
      dependencies: [classify]
      cases:
        - { when: "${nodes.classify.output.hot}", branch: hot_path }
      default_branch: cold_path
    - { id: hot_path, type: tool, tool_id: t, dependencies: [route] }
    - { id: cold_path, type: tool, tool_id: t, dependencies: [route] }
"#,
        )
        .unwrap();
        assert_eq!(workflow.switch_cases("route").len(), 1);
    }

    #[test]
    fn compile_marks_loop_members() {
        let workflow = Workflow::from_yaml(
            r#"
workflow:
  name: loopy
  nodes:
    - { id: step, type: tool, tool_id: t }
    - id: repeat
      type: control
      subtype: loop
      loop:
        kind: count
        count: 3
        body: [step]
"#,
        )
        .unwrap();
        assert!(workflow.is_loop_member("step"));
        assert!(!workflow.is_loop_member("repeat"));
    }

    #[test]
    fn generated_id_when_absent() {
        let w = Workflow::from_yaml(
            r#"
workflow:
  name: anon
  nodes: []
"#,
        )
        .unwrap();
        assert!(!w.id.is_empty());
    }
}
