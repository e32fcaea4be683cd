//! Cycle detection for `depends_on` edges: `depends_on` induces a DAG;
//! cycles must be rejected at creation and at link time without mutating
//! any file.

use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;

use crate::identifiers::TaskId;

/// Returns `true` if adding the edge `from -> to` (i.e. `from` gains a
/// `depends_on` entry for `to`) would introduce a cycle, given the existing
/// edges in `existing`. Pure and side-effect free so callers can check
/// before ever touching disk.
#[must_use]
pub fn would_cycle<'a>(existing: impl Iterator<Item = (&'a TaskId, &'a TaskId)>, from: &TaskId, to: &TaskId) -> bool {
    let mut graph = DiGraph::<(), ()>::new();
    let mut nodes: HashMap<TaskId, petgraph::graph::NodeIndex> = HashMap::new();

    let mut node_for = |graph: &mut DiGraph<(), ()>, nodes: &mut HashMap<TaskId, _>, id: &TaskId| {
        *nodes.entry(id.clone()).or_insert_with(|| graph.add_node(()))
    };

    for (a, b) in existing {
        let na = node_for(&mut graph, &mut nodes, a);
        let nb = node_for(&mut graph, &mut nodes, b);
        graph.add_edge(na, nb, ());
    }

    let na = node_for(&mut graph, &mut nodes, from);
    let nb = node_for(&mut graph, &mut nodes, to);
    graph.add_edge(na, nb, ());

    is_cyclic_directed(&graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> TaskId {
        TaskId::parse(s).unwrap()
    }

    #[test]
    fn direct_self_link_is_a_cycle() {
        let a = id("T-A");
        assert!(would_cycle(std::iter::empty(), &a, &a));
    }

    #[test]
    fn transitive_cycle_is_detected() {
        let a = id("T-A");
        let b = id("T-B");
        let c = id("T-C");
        // existing: A depends on B, B depends on C. Linking C -> A closes the loop.
        let existing = vec![(&a, &b), (&b, &c)];
        assert!(would_cycle(existing.into_iter(), &c, &a));
    }

    #[test]
    fn independent_edge_is_not_a_cycle() {
        let a = id("T-A");
        let b = id("T-B");
        let c = id("T-C");
        let existing = vec![(&a, &b)];
        assert!(!would_cycle(existing.into_iter(), &a, &c));
    }
}
