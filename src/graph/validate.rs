//! Workflow Validation - structural invariants enforced before execution
//!
//! Validates, for DAG workflows:
//! - unique node ids, every dependency/edge endpoint exists, no self-loop
//! - acyclicity (DFS three-color via `GraphIndex`)
//! - control node configuration (switch cases, join sets, loop specs)
//! - template and condition syntax in bindings, edges and handlers
//! - retry/timeout policy values
//!
//! And for state-machine workflows:
//! - exactly one initial state, every transition target declared
//! - guard/action expression syntax
//!
//! All issues are collected into a report; nothing fails fast.

use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::ast::{
    ActionDef, ControlKind, EdgeKind, LoopKind, NodeDef, NodeKind, PolicyDef, RetryPolicyDef,
    StateKind, WorkflowDef, WorkflowKind,
};
use crate::context::{Condition, ContextPath, Template};
use crate::error::StrandError;

use super::index::GraphIndex;

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A single validation issue with context
#[derive(Debug, Error)]
pub enum ValidationIssue {
    #[error("Duplicate node ID: '{id}'")]
    DuplicateNodeId { id: String },

    #[error("Node '{id}' has an empty ID")]
    EmptyNodeId { id: String },

    #[error("Node '{id}' depends on unknown node '{dep}'")]
    UnknownDependency { id: String, dep: String },

    #[error("Edge endpoint '{endpoint}' does not exist")]
    UnknownEdgeEndpoint { endpoint: String },

    #[error("Self-loop detected: node '{id}' connects to itself")]
    SelfLoop { id: String },

    #[error("Cycle detected: {cycle}")]
    Cycle { cycle: String },

    #[error("Switch '{id}' has no cases")]
    SwitchWithoutCases { id: String },

    #[error("Switch '{id}' references unknown branch '{branch}'")]
    UnknownBranch { id: String, branch: String },

    #[error("Join '{id}' watches unknown node '{watched}'")]
    UnknownJoinTarget { id: String, watched: String },

    #[error("Loop '{id}' is incomplete: {details}")]
    IncompleteLoop { id: String, details: String },

    #[error("Loop '{id}' body node '{body}' does not exist")]
    UnknownLoopBody { id: String, body: String },

    #[error("Loop '{loop_id}' body node '{body}' is referenced by '{outside}' outside the loop")]
    LoopBodyLeak {
        loop_id: String,
        body: String,
        outside: String,
    },

    #[error("Aggregation '{id}' has no sources")]
    AggregationWithoutSources { id: String },

    #[error("Aggregation '{id}' references unknown source '{source_id}'")]
    UnknownAggregationSource { id: String, source_id: String },

    #[error("Invalid template in node '{id}' ({location}): {details}")]
    InvalidTemplate {
        id: String,
        location: String,
        details: String,
    },

    #[error("Invalid condition in {location}: {details}")]
    InvalidCondition { location: String, details: String },

    #[error("Invalid retry policy on '{id}': {details}")]
    InvalidRetryPolicy { id: String, details: String },

    #[error("Error handler pattern '{pattern}' is not a valid regex: {details}")]
    InvalidHandlerPattern { pattern: String, details: String },

    #[error("Fallback policy references unknown node '{node}'")]
    UnknownFallbackNode { node: String },

    #[error("Workflow type 'hybrid' is not supported by this engine")]
    HybridUnsupported,

    #[error("State machine has no states")]
    NoStates,

    #[error("State machine requires exactly one initial state, found {count}")]
    InitialStateCount { count: usize },

    #[error("initial_state '{name}' is not declared")]
    UnknownInitialState { name: String },

    #[error("Duplicate state name: '{name}'")]
    DuplicateState { name: String },

    #[error("Transition target '{target}' in state '{state}' is not declared")]
    UnknownTransitionTarget { state: String, target: String },

    #[error("Node '{id}' is not reachable from any root")]
    UnreachableNode { id: String },
}

impl ValidationIssue {
    /// Get severity (error vs warning)
    pub fn severity(&self) -> Severity {
        match self {
            ValidationIssue::UnreachableNode { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Result of validating a workflow definition
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub node_count: usize,
    pub edge_count: usize,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn add(&mut self, issue: ValidationIssue) {
        if issue.severity() == Severity::Warning {
            self.warnings.push(issue);
        } else {
            self.errors.push(issue);
        }
    }

    /// Collapse the report into a single error for fail-fast call sites
    pub fn into_error(self) -> Option<StrandError> {
        if self.errors.is_empty() {
            return None;
        }
        let reason = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Some(StrandError::Validation { reason })
    }
}

/// Validate a workflow definition, collecting every issue
pub fn validate(def: &WorkflowDef) -> ValidationReport {
    let mut report = ValidationReport {
        node_count: def.nodes.len(),
        edge_count: def.edges.len(),
        ..Default::default()
    };

    match def.kind {
        WorkflowKind::Hybrid => {
            report.add(ValidationIssue::HybridUnsupported);
            return report;
        }
        WorkflowKind::StateMachine => {
            validate_state_machine(def, &mut report);
            return report;
        }
        WorkflowKind::Dag => {}
    }

    validate_dag(def, &mut report);
    report
}

fn validate_dag(def: &WorkflowDef, report: &mut ValidationReport) {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for node in &def.nodes {
        if node.id.is_empty() {
            report.add(ValidationIssue::EmptyNodeId {
                id: node.id.clone(),
            });
        }
        if !seen.insert(&node.id) {
            report.add(ValidationIssue::DuplicateNodeId {
                id: node.id.clone(),
            });
        }
    }

    let ids: FxHashSet<&str> = def.nodes.iter().map(|n| n.id.as_str()).collect();

    // Dependencies and edges
    for node in &def.nodes {
        for dep in &node.dependencies {
            if dep == &node.id {
                report.add(ValidationIssue::SelfLoop {
                    id: node.id.clone(),
                });
            } else if !ids.contains(dep.as_str()) {
                report.add(ValidationIssue::UnknownDependency {
                    id: node.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
    }
    for edge in &def.edges {
        if edge.from == edge.to {
            report.add(ValidationIssue::SelfLoop {
                id: edge.from.clone(),
            });
        }
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                report.add(ValidationIssue::UnknownEdgeEndpoint {
                    endpoint: endpoint.clone(),
                });
            }
        }
        if edge.kind == EdgeKind::Conditional {
            if let Some(raw) = &edge.condition {
                if let Err(e) = Condition::parse(raw) {
                    report.add(ValidationIssue::InvalidCondition {
                        location: format!("edge {} → {}", edge.from, edge.to),
                        details: e.to_string(),
                    });
                }
            }
        }
    }

    // Per-node configuration
    let loop_membership = loop_members(def);
    for node in &def.nodes {
        validate_node(node, def, &ids, &loop_membership, report);
    }

    // Global error handlers
    for handler in &def.error_handlers {
        if let Some(pattern) = &handler.nodes {
            if let Err(e) = Regex::new(pattern) {
                report.add(ValidationIssue::InvalidHandlerPattern {
                    pattern: pattern.clone(),
                    details: e.to_string(),
                });
            }
        }
        match &handler.policy {
            PolicyDef::Retry(retry) => validate_retry("error_handlers", retry, report),
            PolicyDef::Fallback {
                node: Some(node), ..
            } => {
                if !ids.contains(node.as_str()) {
                    report.add(ValidationIssue::UnknownFallbackNode { node: node.clone() });
                }
            }
            _ => {}
        }
    }

    // Compensation plan custom order
    if let Some(plan) = &def.compensation {
        for node in &plan.custom_order {
            if !ids.contains(node.as_str()) {
                report.add(ValidationIssue::UnknownDependency {
                    id: "compensation.custom_order".to_string(),
                    dep: node.clone(),
                });
            }
        }
    }

    // Cycles and reachability only make sense on a structurally sound graph
    if report.is_valid() {
        match GraphIndex::from_def(def) {
            Ok(index) => {
                if let Err(StrandError::CycleDetected { cycle }) = index.detect_cycles() {
                    report.add(ValidationIssue::Cycle { cycle });
                }
                check_reachability(def, &index, report);
            }
            Err(e) => {
                report.add(ValidationIssue::InvalidCondition {
                    location: "edges".to_string(),
                    details: e.to_string(),
                });
            }
        }
    }
}

/// Map body node -> owning loop id
fn loop_members(def: &WorkflowDef) -> FxHashMap<&str, &str> {
    let mut members: FxHashMap<&str, &str> = FxHashMap::default();
    for node in &def.nodes {
        if let NodeKind::Control { control } = &node.kind {
            if let Some(spec) = &control.loop_spec {
                for body in &spec.body {
                    members.insert(body.as_str(), node.id.as_str());
                }
            }
        }
    }
    members
}

fn validate_node(
    node: &NodeDef,
    def: &WorkflowDef,
    ids: &FxHashSet<&str>,
    loop_membership: &FxHashMap<&str, &str>,
    report: &mut ValidationReport,
) {
    // Input binding templates
    for (alias, raw) in &node.inputs {
        if let Err(e) = Template::parse(raw) {
            report.add(ValidationIssue::InvalidTemplate {
                id: node.id.clone(),
                location: format!("input '{}'", alias),
                details: e.to_string(),
            });
        }
    }

    if let Some(retry) = &node.retry {
        validate_retry(&node.id, retry, report);
    }

    if let Some(comp) = &node.compensation {
        for (alias, raw) in &comp.input {
            if let Err(e) = Template::parse(raw) {
                report.add(ValidationIssue::InvalidTemplate {
                    id: node.id.clone(),
                    location: format!("compensation input '{}'", alias),
                    details: e.to_string(),
                });
            }
        }
    }

    // Non-body nodes must not depend on loop body nodes
    if loop_membership.get(node.id.as_str()).is_none() {
        for dep in &node.dependencies {
            if let Some(loop_id) = loop_membership.get(dep.as_str()) {
                if *loop_id != node.id {
                    report.add(ValidationIssue::LoopBodyLeak {
                        loop_id: loop_id.to_string(),
                        body: dep.clone(),
                        outside: node.id.clone(),
                    });
                }
            }
        }
    }

    match &node.kind {
        NodeKind::Control { control } => match control.subtype {
            ControlKind::Switch => {
                if control.cases.is_empty() {
                    report.add(ValidationIssue::SwitchWithoutCases {
                        id: node.id.clone(),
                    });
                }
                for case in &control.cases {
                    if !ids.contains(case.branch.as_str()) {
                        report.add(ValidationIssue::UnknownBranch {
                            id: node.id.clone(),
                            branch: case.branch.clone(),
                        });
                    }
                    if let Err(e) = Condition::parse(&case.when) {
                        report.add(ValidationIssue::InvalidCondition {
                            location: format!("switch '{}' case", node.id),
                            details: e.to_string(),
                        });
                    }
                }
                if let Some(branch) = &control.default_branch {
                    if !ids.contains(branch.as_str()) {
                        report.add(ValidationIssue::UnknownBranch {
                            id: node.id.clone(),
                            branch: branch.clone(),
                        });
                    }
                }
            }
            ControlKind::Join => {
                for watched in &control.join_on {
                    if !ids.contains(watched.as_str()) {
                        report.add(ValidationIssue::UnknownJoinTarget {
                            id: node.id.clone(),
                            watched: watched.clone(),
                        });
                    }
                }
            }
            ControlKind::Loop => match &control.loop_spec {
                None => report.add(ValidationIssue::IncompleteLoop {
                    id: node.id.clone(),
                    details: "missing `loop:` declaration".to_string(),
                }),
                Some(spec) => {
                    if spec.body.is_empty() {
                        report.add(ValidationIssue::IncompleteLoop {
                            id: node.id.clone(),
                            details: "empty body".to_string(),
                        });
                    }
                    for body in &spec.body {
                        if !ids.contains(body.as_str()) {
                            report.add(ValidationIssue::UnknownLoopBody {
                                id: node.id.clone(),
                                body: body.clone(),
                            });
                        }
                        if body == &node.id {
                            report.add(ValidationIssue::SelfLoop {
                                id: node.id.clone(),
                            });
                        }
                    }
                    match spec.kind {
                        LoopKind::While => {
                            match &spec.condition {
                                None => report.add(ValidationIssue::IncompleteLoop {
                                    id: node.id.clone(),
                                    details: "`while` loop requires a condition".to_string(),
                                }),
                                Some(raw) => {
                                    if let Err(e) = Condition::parse(raw) {
                                        report.add(ValidationIssue::InvalidCondition {
                                            location: format!("loop '{}'", node.id),
                                            details: e.to_string(),
                                        });
                                    }
                                }
                            }
                        }
                        LoopKind::ForEach => match &spec.items {
                            None => report.add(ValidationIssue::IncompleteLoop {
                                id: node.id.clone(),
                                details: "`for_each` loop requires `items`".to_string(),
                            }),
                            Some(raw) => {
                                if let Err(e) = Template::parse(raw) {
                                    report.add(ValidationIssue::InvalidTemplate {
                                        id: node.id.clone(),
                                        location: "loop items".to_string(),
                                        details: e.to_string(),
                                    });
                                }
                            }
                        },
                        LoopKind::Count => {
                            if spec.count.is_none() {
                                report.add(ValidationIssue::IncompleteLoop {
                                    id: node.id.clone(),
                                    details: "`count` loop requires `count`".to_string(),
                                });
                            }
                        }
                    }
                }
            },
            ControlKind::Parallel => {}
        },
        NodeKind::Aggregation { aggregation } => {
            if aggregation.sources.is_empty() {
                report.add(ValidationIssue::AggregationWithoutSources {
                    id: node.id.clone(),
                });
            }
            for source in &aggregation.sources {
                if !ids.contains(source.as_str()) {
                    report.add(ValidationIssue::UnknownAggregationSource {
                        id: node.id.clone(),
                        source_id: source.clone(),
                    });
                }
            }
        }
        NodeKind::SubWorkflow { sub } => {
            // Existence of the nested workflow is a runtime repo lookup;
            // only self-nesting by name can be caught statically.
            if sub.workflow == def.name && sub.workflow_version == def.version {
                report.add(ValidationIssue::SelfLoop {
                    id: node.id.clone(),
                });
            }
        }
        NodeKind::Agent { .. } | NodeKind::Tool { .. } => {}
    }
}

fn validate_retry(owner: &str, retry: &RetryPolicyDef, report: &mut ValidationReport) {
    if let Some(jitter) = retry.jitter {
        if !(0.0..=1.0).contains(&jitter) {
            report.add(ValidationIssue::InvalidRetryPolicy {
                id: owner.to_string(),
                details: format!("jitter {} outside 0.0..=1.0", jitter),
            });
        }
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        report.add(ValidationIssue::InvalidRetryPolicy {
            id: owner.to_string(),
            details: format!(
                "base_delay_ms {} exceeds max_delay_ms {}",
                retry.base_delay_ms, retry.max_delay_ms
            ),
        });
    }
}

fn check_reachability(def: &WorkflowDef, index: &GraphIndex, report: &mut ValidationReport) {
    let members = loop_members(def);
    let roots = index.roots();
    let mut visited: FxHashSet<&str> = FxHashSet::default();
    let mut queue: Vec<&str> = Vec::new();

    for root in &roots {
        // Loop body roots have no deps but are only entered via their loop
        if members.contains_key(root.as_ref()) {
            continue;
        }
        queue.push(root.as_ref());
    }

    while let Some(current) = queue.pop() {
        if !visited.insert(current) {
            continue;
        }
        for succ in index.successors(current) {
            queue.push(succ.as_ref());
        }
        // A reachable loop makes its body reachable
        if let Some(node) = def.node(current) {
            if let NodeKind::Control { control } = &node.kind {
                if let Some(spec) = &control.loop_spec {
                    for body in &spec.body {
                        queue.push(body.as_str());
                    }
                }
            }
        }
    }

    for node in &def.nodes {
        if !visited.contains(node.id.as_str()) {
            report.add(ValidationIssue::UnreachableNode {
                id: node.id.clone(),
            });
        }
    }
}

fn validate_state_machine(def: &WorkflowDef, report: &mut ValidationReport) {
    if def.states.is_empty() {
        report.add(ValidationIssue::NoStates);
        return;
    }

    let mut names: FxHashSet<&str> = FxHashSet::default();
    for state in &def.states {
        if !names.insert(&state.name) {
            report.add(ValidationIssue::DuplicateState {
                name: state.name.clone(),
            });
        }
    }

    // Exactly one initial state: either a single `type: initial` state or
    // a declared `initial_state` naming an existing state (or both, agreeing)
    let typed_initials: Vec<&str> = def
        .states
        .iter()
        .filter(|s| s.kind == StateKind::Initial)
        .map(|s| s.name.as_str())
        .collect();
    match (&def.initial_state, typed_initials.len()) {
        (None, 1) => {}
        (None, n) => report.add(ValidationIssue::InitialStateCount { count: n }),
        (Some(name), n) => {
            if !names.contains(name.as_str()) {
                report.add(ValidationIssue::UnknownInitialState { name: name.clone() });
            }
            if n > 1 || (n == 1 && typed_initials[0] != name) {
                report.add(ValidationIssue::InitialStateCount { count: n + 1 });
            }
        }
    }

    for state in &def.states {
        for transition in &state.transitions {
            if !names.contains(transition.target.as_str()) {
                report.add(ValidationIssue::UnknownTransitionTarget {
                    state: state.name.clone(),
                    target: transition.target.clone(),
                });
            }
            if let Some(raw) = &transition.condition {
                if let Err(e) = Condition::parse(raw) {
                    report.add(ValidationIssue::InvalidCondition {
                        location: format!("state '{}' on '{}'", state.name, transition.event),
                        details: e.to_string(),
                    });
                }
            }
            validate_actions(&state.name, &transition.actions, report);
        }
        validate_actions(&state.name, &state.on_enter, report);
        validate_actions(&state.name, &state.on_exit, report);
    }
}

fn validate_actions(state: &str, actions: &[ActionDef], report: &mut ValidationReport) {
    for action in actions {
        let result = match action {
            ActionDef::Log { message } => Template::parse(message).map(drop),
            ActionDef::SetContext { path, .. } => ContextPath::parse(path).map(drop),
            ActionDef::InvokeAgent { input, .. } => input
                .values()
                .try_for_each(|raw| Template::parse(raw).map(drop)),
            ActionDef::InvokeTool { params, .. } => params
                .values()
                .try_for_each(|raw| Template::parse(raw).map(drop)),
            ActionDef::EmitEvent { .. }
            | ActionDef::TimerStart { .. }
            | ActionDef::TimerCancel { .. } => Ok(()),
        };
        if let Err(e) = result {
            report.add(ValidationIssue::InvalidTemplate {
                id: state.to_string(),
                location: "action".to_string(),
                details: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::WorkflowDoc;

    fn check(yaml: &str) -> ValidationReport {
        let doc: WorkflowDoc = serde_yaml::from_str(yaml).unwrap();
        validate(&doc.workflow)
    }

    #[test]
    fn valid_linear_workflow_passes() {
        let report = check(
            r#"
workflow:
  name: ok
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: b, type: tool, tool_id: t, dependencies: [a] }
"#,
        );
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let report = check(
            r#"
workflow:
  name: dup
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: a, type: tool, tool_id: t }
"#,
        );
        assert!(!report.is_valid());
        assert!(matches!(
            report.errors[0],
            ValidationIssue::DuplicateNodeId { .. }
        ));
    }

    #[test]
    fn unknown_dependency_rejected() {
        let report = check(
            r#"
workflow:
  name: missing
  nodes:
    - { id: a, type: tool, tool_id: t, dependencies: [ghost] }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::UnknownDependency { .. })));
    }

    #[test]
    fn cycle_rejected() {
        let report = check(
            r#"
workflow:
  name: cyc
  nodes:
    - { id: a, type: tool, tool_id: t, dependencies: [b] }
    - { id: b, type: tool, tool_id: t, dependencies: [a] }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::Cycle { .. })));
    }

    #[test]
    fn self_loop_rejected() {
        let report = check(
            r#"
workflow:
  name: selfy
  nodes:
    - { id: a, type: tool, tool_id: t, dependencies: [a] }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::SelfLoop { .. })));
    }

    #[test]
    fn hybrid_rejected() {
        let report = check(
            r#"
workflow:
  name: h
  type: hybrid
  nodes: []
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::HybridUnsupported)));
    }

    #[test]
    fn switch_unknown_branch_rejected() {
        let report = check(
            r#"
workflow:
  name: sw
  nodes:
    - { id: a, type: tool, tool_id: t }
    - id: route
      type: control
      subtype: switch
      dependencies: [a]
      cases:
        - { when: "true", branch: ghost }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::UnknownBranch { .. })));
    }

    #[test]
    fn while_loop_without_condition_rejected() {
        let report = check(
            r#"
workflow:
  name: lp
  nodes:
    - { id: step, type: tool, tool_id: t }
    - id: repeat
      type: control
      subtype: loop
      loop:
        kind: while
        body: [step]
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::IncompleteLoop { .. })));
    }

    #[test]
    fn loop_body_leak_rejected() {
        let report = check(
            r#"
workflow:
  name: leak
  nodes:
    - { id: step, type: tool, tool_id: t }
    - id: repeat
      type: control
      subtype: loop
      loop:
        kind: count
        count: 2
        body: [step]
    - { id: after, type: tool, tool_id: t, dependencies: [step] }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::LoopBodyLeak { .. })));
    }

    #[test]
    fn bad_template_rejected() {
        let report = check(
            r#"
workflow:
  name: tpl
  nodes:
    - id: a
      type: tool
      tool_id: t
      inputs:
        bad: "${a..b}"
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::InvalidTemplate { .. })));
    }

    #[test]
    fn bad_handler_regex_rejected() {
        let report = check(
            r#"
workflow:
  name: h
  nodes:
    - { id: a, type: tool, tool_id: t }
  error_handlers:
    - nodes: "["
      policy: escalate
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::InvalidHandlerPattern { .. })));
    }

    #[test]
    fn state_machine_requires_single_initial() {
        let report = check(
            r#"
workflow:
  name: sm
  type: state_machine
  states:
    - { name: a, type: initial }
    - { name: b, type: initial }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::InitialStateCount { .. })));
    }

    #[test]
    fn state_machine_unknown_target_rejected() {
        let report = check(
            r#"
workflow:
  name: sm
  type: state_machine
  states:
    - name: created
      type: initial
      transitions:
        - { event: pay, target: ghost }
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::UnknownTransitionTarget { .. })));
    }

    #[test]
    fn state_machine_valid_order_flow() {
        let report = check(
            r#"
workflow:
  name: order
  type: state_machine
  initial_state: created
  states:
    - name: created
      type: initial
      transitions:
        - { event: pay, target: paid }
    - name: paid
      transitions:
        - { event: ship, target: shipped }
    - name: shipped
      type: final
"#,
        );
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn unreachable_node_is_warning_only() {
        let report = check(
            r#"
workflow:
  name: orphanish
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: b, type: tool, tool_id: t, dependencies: [a] }
    - { id: orphan, type: tool, tool_id: t, dependencies: [b] }
"#,
        );
        // Fully connected: no warnings expected here
        assert!(report.is_valid());
        assert!(!report.has_warnings());
    }

    #[test]
    fn retry_jitter_out_of_range_rejected() {
        let report = check(
            r#"
workflow:
  name: rj
  nodes:
    - id: a
      type: tool
      tool_id: t
      retry:
        max_attempts: 3
        jitter: 1.5
"#,
        );
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::InvalidRetryPolicy { .. })));
    }
}
