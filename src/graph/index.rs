//! GraphIndex - indexed DAG structure built from nodes and edges
//!
//! Performance notes:
//! - Arc<str> for zero-cost cloning of node IDs
//! - FxHashMap for faster hashing (non-crypto)
//! - SmallVec for stack-allocated small dependency lists (0-4 items)
//!
//! Cycle detection uses the DFS three-color algorithm.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::ast::{EdgeKind, WorkflowDef};
use crate::context::Condition;
use crate::error::StrandError;

/// Stack-allocated deps: most nodes have 0-4 dependencies
pub type DepVec = SmallVec<[Arc<str>; 4]>;

/// An incoming activation edge. A dependency without a declared edge is
/// an unconditional activation; a conditional edge carries its compiled
/// condition.
#[derive(Debug, Clone)]
pub struct IncomingEdge {
    pub from: Arc<str>,
    pub condition: Option<Condition>,
}

/// Graph of node dependencies built from `dependencies` and `edges`
pub struct GraphIndex {
    /// node_id -> successor node_ids
    adjacency: FxHashMap<Arc<str>, DepVec>,
    /// node_id -> predecessor node_ids
    predecessors: FxHashMap<Arc<str>, DepVec>,
    /// node_id -> incoming activation edges (with compiled conditions)
    incoming: FxHashMap<Arc<str>, Vec<IncomingEdge>>,
    /// All node IDs in declaration order
    node_ids: Vec<Arc<str>>,
    /// Quick lookup for node existence
    node_set: FxHashSet<Arc<str>>,
}

impl GraphIndex {
    /// Build the index from a definition. Edge conditions are compiled
    /// here; run `validate` first so syntax errors surface as a report.
    pub fn from_def(def: &WorkflowDef) -> Result<Self, StrandError> {
        let capacity = def.nodes.len();
        let mut adjacency: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut predecessors: FxHashMap<Arc<str>, DepVec> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut incoming: FxHashMap<Arc<str>, Vec<IncomingEdge>> =
            FxHashMap::with_capacity_and_hasher(capacity, Default::default());
        let mut node_ids: Vec<Arc<str>> = Vec::with_capacity(capacity);
        let mut node_set: FxHashSet<Arc<str>> =
            FxHashSet::with_capacity_and_hasher(capacity, Default::default());

        for node in &def.nodes {
            let id: Arc<str> = Arc::from(node.id.as_str());
            node_ids.push(Arc::clone(&id));
            node_set.insert(Arc::clone(&id));
            adjacency.insert(Arc::clone(&id), DepVec::new());
            predecessors.insert(Arc::clone(&id), DepVec::new());
            incoming.insert(id, Vec::new());
        }

        let lookup = |name: &str| -> Arc<str> {
            node_set
                .get(name)
                .cloned()
                .unwrap_or_else(|| Arc::from(name))
        };

        let mut link =
            |from: Arc<str>, to: Arc<str>, condition: Option<Condition>| {
                let preds = predecessors.entry(Arc::clone(&to)).or_default();
                // Dedup: a dependency may also appear as an explicit edge
                if !preds.iter().any(|p| p.as_ref() == from.as_ref()) {
                    preds.push(Arc::clone(&from));
                    adjacency
                        .entry(Arc::clone(&from))
                        .or_default()
                        .push(Arc::clone(&to));
                }
                let edges = incoming.entry(to).or_default();
                match edges.iter_mut().find(|e| e.from.as_ref() == from.as_ref()) {
                    Some(existing) => {
                        if condition.is_some() {
                            existing.condition = condition;
                        }
                    }
                    None => edges.push(IncomingEdge { from, condition }),
                }
            };

        for node in &def.nodes {
            let to = lookup(&node.id);
            for dep in &node.dependencies {
                link(lookup(dep), Arc::clone(&to), None);
            }
        }

        for edge in &def.edges {
            let condition = match (&edge.kind, &edge.condition) {
                (EdgeKind::Conditional, Some(raw)) => Some(Condition::parse(raw)?),
                _ => None,
            };
            link(lookup(&edge.from), lookup(&edge.to), condition);
        }

        Ok(Self {
            adjacency,
            predecessors,
            incoming,
            node_ids,
            node_set,
        })
    }

    /// Get dependencies of a node
    #[inline]
    pub fn dependencies(&self, node_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.predecessors
            .get(node_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Get successors of a node
    #[inline]
    pub fn successors(&self, node_id: &str) -> &[Arc<str>] {
        static EMPTY: &[Arc<str>] = &[];
        self.adjacency
            .get(node_id)
            .map_or(EMPTY, SmallVec::as_slice)
    }

    /// Incoming activation edges of a node
    pub fn incoming(&self, node_id: &str) -> &[IncomingEdge] {
        static EMPTY: &[IncomingEdge] = &[];
        self.incoming.get(node_id).map_or(EMPTY, Vec::as_slice)
    }

    /// All node ids in declaration order
    pub fn node_ids(&self) -> &[Arc<str>] {
        &self.node_ids
    }

    /// Check if node exists
    #[inline]
    pub fn contains(&self, node_id: &str) -> bool {
        self.node_set.contains(node_id)
    }

    /// Nodes with no dependencies (the initial ready set)
    pub fn roots(&self) -> Vec<Arc<str>> {
        self.node_ids
            .iter()
            .filter(|id| self.dependencies(id).is_empty())
            .cloned()
            .collect()
    }

    /// Nodes with no successors (final outputs)
    pub fn finals(&self) -> Vec<Arc<str>> {
        self.node_ids
            .iter()
            .filter(|id| self.successors(id).is_empty())
            .cloned()
            .collect()
    }

    /// Check if there's a path from `from` to `to` (BFS)
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }

        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: VecDeque<&str> = VecDeque::new();

        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            if let Some(neighbors) = self.adjacency.get(current) {
                for neighbor in neighbors {
                    if neighbor.as_ref() == to {
                        return true;
                    }
                    if !visited.contains(neighbor.as_ref()) {
                        visited.insert(neighbor.as_ref());
                        queue.push_back(neighbor.as_ref());
                    }
                }
            }
        }

        false
    }

    /// Detect cycles using DFS with three-color marking.
    ///
    /// - White: unvisited
    /// - Gray: currently in DFS stack (visiting)
    /// - Black: fully processed
    ///
    /// A cycle exists when a Gray node is reached while traversing.
    pub fn detect_cycles(&self) -> Result<(), StrandError> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: FxHashMap<Arc<str>, Color> = self
            .node_ids
            .iter()
            .map(|id| (Arc::clone(id), Color::White))
            .collect();
        let mut stack: Vec<Arc<str>> = Vec::new();

        fn dfs(
            node: Arc<str>,
            adjacency: &FxHashMap<Arc<str>, DepVec>,
            colors: &mut FxHashMap<Arc<str>, Color>,
            stack: &mut Vec<Arc<str>>,
        ) -> Result<(), String> {
            colors.insert(Arc::clone(&node), Color::Gray);
            stack.push(Arc::clone(&node));

            if let Some(neighbors) = adjacency.get(&node) {
                for neighbor in neighbors {
                    match colors.get(neighbor) {
                        Some(Color::Gray) => {
                            let cycle_start = stack
                                .iter()
                                .position(|x| x.as_ref() == neighbor.as_ref())
                                .unwrap_or(0);
                            let cycle: Vec<&str> =
                                stack[cycle_start..].iter().map(|s| s.as_ref()).collect();
                            return Err(format!("{} → {}", cycle.join(" → "), neighbor));
                        }
                        Some(Color::White) | None => {
                            dfs(Arc::clone(neighbor), adjacency, colors, stack)?;
                        }
                        Some(Color::Black) => {}
                    }
                }
            }

            stack.pop();
            colors.insert(node, Color::Black);
            Ok(())
        }

        for node_id in &self.node_ids {
            if colors.get(node_id) == Some(&Color::White) {
                if let Err(cycle) = dfs(
                    Arc::clone(node_id),
                    &self.adjacency,
                    &mut colors,
                    &mut stack,
                ) {
                    return Err(StrandError::CycleDetected { cycle });
                }
            }
        }

        Ok(())
    }
}
