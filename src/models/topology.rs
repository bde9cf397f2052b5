// Plan Graph Layering
//
// Kahn-style layering of IR nodes. The compiler uses it to reject cycles and
// the interpreter walks its layers in order.

use std::collections::{BTreeMap, BTreeSet};

use super::ir::{LogicalEdge, LogicalNode};

/// Result of layering: placed layers plus the nodes stuck on a cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layering {
    pub layers: Vec<Vec<String>>,
    pub unplaced: Vec<String>,
}

impl Layering {
    pub fn is_acyclic(&self) -> bool {
        self.unplaced.is_empty()
    }
}

/// Level-by-level Kahn traversal.
///
/// A node lands in the smallest layer k such that all of its inputs sit in
/// layers below k. Members of a layer are sorted by node id.
pub fn layer_nodes(nodes: &[LogicalNode], edges: &[LogicalEdge]) -> Layering {
    let mut indegree: BTreeMap<&str, usize> =
        nodes.iter().map(|n| (n.node_id.as_str(), 0)).collect();
    let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for edge in edges {
        if !indegree.contains_key(edge.from_id.as_str()) {
            continue;
        }
        if let Some(count) = indegree.get_mut(edge.to_id.as_str()) {
            *count += 1;
            successors
                .entry(edge.from_id.as_str())
                .or_default()
                .push(edge.to_id.as_str());
        }
    }

    let mut current: Vec<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut layers = Vec::new();

    while !current.is_empty() {
        let mut next: BTreeSet<&str> = BTreeSet::new();
        for id in &current {
            placed.insert(*id);
            for succ in successors.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = indegree.get_mut(succ) {
                    *count -= 1;
                    if *count == 0 {
                        next.insert(*succ);
                    }
                }
            }
        }
        layers.push(current.iter().map(|id| id.to_string()).collect());
        current = next.into_iter().collect();
    }

    let unplaced = indegree
        .keys()
        .filter(|id| !placed.contains(*id))
        .map(|id| id.to_string())
        .collect();

    Layering { layers, unplaced }
}
