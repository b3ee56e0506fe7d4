//! Graph Optimizer - topological layers and parallel-eligible groups
//!
//! The engine does not require these for correctness (readiness is a
//! dynamic predicate); they are hints for batching parallel dispatch and
//! for the `strand graph` inspection command.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::index::GraphIndex;

/// Nodes at the same layer sharing an identical predecessor set; safe to
/// submit as one batch.
#[derive(Debug, Clone)]
pub struct ParallelGroup {
    pub layer: usize,
    pub nodes: Vec<Arc<str>>,
}

/// Kahn layering: layer 0 holds dependency-free nodes, layer n+1 holds
/// nodes whose last dependency sits in layer n. Assumes an acyclic graph
/// (validated earlier); nodes on a cycle would simply not appear.
pub fn topo_layers(index: &GraphIndex) -> Vec<Vec<Arc<str>>> {
    let mut indegree: FxHashMap<&str, usize> = index
        .node_ids()
        .iter()
        .map(|id| (id.as_ref(), index.dependencies(id).len()))
        .collect();

    let mut layers: Vec<Vec<Arc<str>>> = Vec::new();
    let mut current: Vec<Arc<str>> = index
        .node_ids()
        .iter()
        .filter(|id| indegree[id.as_ref()] == 0)
        .cloned()
        .collect();

    while !current.is_empty() {
        let mut next: Vec<Arc<str>> = Vec::new();
        for node in &current {
            for succ in index.successors(node) {
                let entry = indegree.get_mut(succ.as_ref()).expect("known node");
                *entry -= 1;
                if *entry == 0 {
                    next.push(Arc::clone(succ));
                }
            }
        }
        layers.push(std::mem::take(&mut current));
        current = next;
    }

    layers
}

/// Group nodes within each layer by identical predecessor sets
pub fn parallel_groups(index: &GraphIndex, layers: &[Vec<Arc<str>>]) -> Vec<ParallelGroup> {
    let mut groups: Vec<ParallelGroup> = Vec::new();

    for (layer_idx, layer) in layers.iter().enumerate() {
        // Key: sorted predecessor list, joined
        let mut by_preds: FxHashMap<String, Vec<Arc<str>>> = FxHashMap::default();
        for node in layer {
            let mut preds: Vec<&str> = index
                .dependencies(node)
                .iter()
                .map(|p| p.as_ref())
                .collect();
            preds.sort_unstable();
            by_preds
                .entry(preds.join("\u{1f}"))
                .or_default()
                .push(Arc::clone(node));
        }
        let mut layer_groups: Vec<ParallelGroup> = by_preds
            .into_values()
            .map(|mut nodes| {
                nodes.sort();
                ParallelGroup {
                    layer: layer_idx,
                    nodes,
                }
            })
            .collect();
        layer_groups.sort_by(|a, b| a.nodes.cmp(&b.nodes));
        groups.extend(layer_groups);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::WorkflowDoc;

    fn build(yaml: &str) -> GraphIndex {
        let doc: WorkflowDoc = serde_yaml::from_str(yaml).unwrap();
        GraphIndex::from_def(&doc.workflow).unwrap()
    }

    #[test]
    fn linear_chain_yields_one_node_per_layer() {
        let index = build(
            r#"
workflow:
  name: chain
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: b, type: tool, tool_id: t, dependencies: [a] }
    - { id: c, type: tool, tool_id: t, dependencies: [b] }
"#,
        );
        let layers = topo_layers(&index);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec![Arc::<str>::from("a")]);
        assert_eq!(layers[2], vec![Arc::<str>::from("c")]);
    }

    #[test]
    fn fan_out_lands_in_one_layer() {
        let index = build(
            r#"
workflow:
  name: fan
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: b, type: tool, tool_id: t, dependencies: [a] }
    - { id: c, type: tool, tool_id: t, dependencies: [a] }
    - { id: d, type: tool, tool_id: t, dependencies: [a] }
    - { id: e, type: tool, tool_id: t, dependencies: [b, c, d] }
"#,
        );
        let layers = topo_layers(&index);
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1].len(), 3);

        let groups = parallel_groups(&index, &layers);
        // b, c, d share predecessor {a}: one group of three
        let wide = groups.iter().find(|g| g.nodes.len() == 3).unwrap();
        assert_eq!(wide.layer, 1);
    }

    #[test]
    fn distinct_predecessor_sets_split_groups() {
        let index = build(
            r#"
workflow:
  name: split
  nodes:
    - { id: a, type: tool, tool_id: t }
    - { id: b, type: tool, tool_id: t }
    - { id: c, type: tool, tool_id: t, dependencies: [a] }
    - { id: d, type: tool, tool_id: t, dependencies: [b] }
"#,
        );
        let layers = topo_layers(&index);
        let groups = parallel_groups(&index, &layers);
        // Layer 1 has c (preds {a}) and d (preds {b}): two groups
        let layer1: Vec<_> = groups.iter().filter(|g| g.layer == 1).collect();
        assert_eq!(layer1.len(), 2);
    }

    #[test]
    fn empty_workflow_yields_no_layers() {
        let index = build(
            r#"
workflow:
  name: empty
  nodes: []
"#,
        );
        assert!(topo_layers(&index).is_empty());
    }
}
