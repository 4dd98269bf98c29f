//! Dependency DAG over resource nodes.
//!
//! Edges point from a dependency to its dependent. Acyclicity is enforced on
//! every `add_edge` with an incremental reachability check, and
//! `topological_order` re-validates it with Kahn's algorithm. Ties are broken
//! by declaration order (first declared, first ordered) so plans are
//! reproducible across runs.

use super::error::{PlanError, Result};
use super::types::ResourceNode;
use indexmap::{IndexMap, IndexSet};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

/// Resource nodes plus directed dependency edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: IndexMap<String, ResourceNode>,
    /// node -> nodes it depends on
    dependencies: IndexMap<String, IndexSet<String>>,
    /// node -> nodes that depend on it
    dependents: IndexMap<String, IndexSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from nodes, then wire their declared `depends_on` edges.
    /// Nodes may be declared in any order.
    pub fn from_nodes(nodes: impl IntoIterator<Item = ResourceNode>) -> Result<Self> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_node(node)?;
        }
        graph.link_declared_dependencies()?;
        Ok(graph)
    }

    /// Add an edge for every `depends_on` entry of every node.
    pub fn link_declared_dependencies(&mut self) -> Result<()> {
        let declared: Vec<(String, String)> = self
            .nodes
            .values()
            .flat_map(|n| n.depends_on.iter().map(|d| (d.clone(), n.id.clone())))
            .collect();
        for (from, to) in declared {
            self.add_edge(&from, &to)?;
        }
        Ok(())
    }

    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(PlanError::DuplicateId(node.id));
        }
        self.dependencies.insert(node.id.clone(), IndexSet::new());
        self.dependents.insert(node.id.clone(), IndexSet::new());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Record that `to` depends on `from`. Rejected edges leave the graph
    /// unchanged; re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        for id in [from, to] {
            if !self.nodes.contains_key(id) {
                return Err(PlanError::UnknownNode(id.to_string()));
            }
        }
        if from == to {
            return Err(PlanError::CycleDetected(vec![
                from.to_string(),
                to.to_string(),
            ]));
        }
        if self.has_edge(from, to) {
            return Ok(());
        }
        if let Some(path) = self.path_between(to, from) {
            let mut cycle = vec![from.to_string()];
            cycle.extend(path);
            return Err(PlanError::CycleDetected(cycle));
        }

        if let Some(deps) = self.dependencies.get_mut(to) {
            deps.insert(from.to_string());
        }
        if let Some(users) = self.dependents.get_mut(from) {
            users.insert(to.to_string());
        }
        Ok(())
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.dependencies
            .get(to)
            .is_some_and(|deps| deps.contains(from))
    }

    /// Shortest path from `start` to `goal` following dependent edges.
    fn path_between(&self, start: &str, goal: &str) -> Option<Vec<String>> {
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::from([start]);
        let mut queue: VecDeque<&str> = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![current.to_string()];
                let mut cursor = current;
                while let Some(&prev) = parent.get(cursor) {
                    path.push(prev.to_string());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            if let Some(next) = self.dependents.get(current) {
                for n in next {
                    if seen.insert(n.as_str()) {
                        parent.insert(n.as_str(), current);
                        queue.push_back(n.as_str());
                    }
                }
            }
        }
        None
    }

    /// Deterministic total order consistent with every edge.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .nodes
            .keys()
            .map(|id| self.dependencies.get(id).map_or(0, IndexSet::len))
            .collect();

        // Min-heap on declaration index
        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(index)) = ready.pop() {
            let Some((id, _)) = self.nodes.get_index(index) else {
                continue;
            };
            order.push(id.clone());

            for dependent in self.dependents.get(id).into_iter().flatten() {
                if let Some(j) = self.nodes.get_index_of(dependent) {
                    in_degree[j] -= 1;
                    if in_degree[j] == 0 {
                        ready.push(Reverse(j));
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let remaining: IndexSet<&str> = self
                .nodes
                .keys()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, id)| id.as_str())
                .collect();
            return Err(PlanError::CycleDetected(self.find_cycle(&remaining)));
        }

        Ok(order)
    }

    /// Walk dependencies inside the unordered remainder until a node repeats.
    /// Every remaining node has at least one remaining dependency.
    fn find_cycle(&self, remaining: &IndexSet<&str>) -> Vec<String> {
        let Some(&start) = remaining.first() else {
            return Vec::new();
        };
        let mut walk: Vec<&str> = vec![start];
        let mut current = start;
        loop {
            let next = self
                .dependencies
                .get(current)
                .and_then(|deps| deps.iter().find(|d| remaining.contains(d.as_str())));
            let Some(next) = next else {
                return remaining.iter().map(|s| s.to_string()).collect();
            };
            if let Some(pos) = walk.iter().position(|w| *w == next.as_str()) {
                // walk follows dependencies backwards; flip to edge direction
                let mut cycle: Vec<String> =
                    walk[pos..].iter().rev().map(|s| s.to_string()).collect();
                cycle.insert(0, next.clone());
                return cycle;
            }
            walk.push(next.as_str());
            current = next.as_str();
        }
    }

    pub fn get(&self, id: &str) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(IndexSet::len).sum()
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.nodes.values()
    }

    /// Direct dependencies of a node (declared plus synthetic edges).
    pub fn dependencies_of(&self, id: &str) -> Option<&IndexSet<String>> {
        self.dependencies.get(id)
    }

    pub fn dependents_of(&self, id: &str) -> Option<&IndexSet<String>> {
        self.dependents.get(id)
    }

    /// Every node reachable from `id` along dependent edges, breadth first.
    pub fn transitive_dependents(&self, id: &str) -> IndexSet<String> {
        let mut found: IndexSet<String> = IndexSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for next in self.dependents.get(current).into_iter().flatten() {
                if found.insert(next.clone()) {
                    queue.push_back(next.as_str());
                }
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResourceKind;
    use proptest::prelude::*;

    fn node(id: &str, kind: ResourceKind) -> ResourceNode {
        ResourceNode::new(id, kind)
    }

    fn position(order: &[String], id: &str) -> usize {
        order.iter().position(|x| x == id).unwrap()
    }

    #[test]
    fn test_graph_linear() {
        let graph = DependencyGraph::from_nodes([
            node("a", ResourceKind::Storage),
            node("b", ResourceKind::AccessIdentity).with_dependency("a"),
            node("c", ResourceKind::CdnDistribution).with_dependency("b"),
        ])
        .unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_graph_ties_follow_declaration_order() {
        let graph = DependencyGraph::from_nodes([
            node("zeta", ResourceKind::Storage),
            node("alpha", ResourceKind::Storage),
            node("mid", ResourceKind::Certificate),
        ])
        .unwrap();
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["zeta", "alpha", "mid"]
        );
    }

    #[test]
    fn test_graph_dependencies_declared_later() {
        let graph = DependencyGraph::from_nodes([
            node("records", ResourceKind::DnsRecord).with_dependency("dist"),
            node("dist", ResourceKind::CdnDistribution),
        ])
        .unwrap();
        assert_eq!(graph.topological_order().unwrap(), vec!["dist", "records"]);
    }

    #[test]
    fn test_graph_diamond() {
        let graph = DependencyGraph::from_nodes([
            node("top", ResourceKind::Storage),
            node("left", ResourceKind::AccessIdentity).with_dependency("top"),
            node("right", ResourceKind::Certificate).with_dependency("top"),
            node("bottom", ResourceKind::CdnDistribution)
                .with_dependency("left")
                .with_dependency("right"),
        ])
        .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order, vec!["top", "left", "right", "bottom"]);
    }

    #[test]
    fn test_graph_duplicate_id() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("site", ResourceKind::Storage)).unwrap();
        let err = graph
            .add_node(node("site", ResourceKind::Certificate))
            .unwrap_err();
        assert_eq!(err, PlanError::DuplicateId("site".to_string()));
        assert_eq!(graph.get("site").unwrap().kind, ResourceKind::Storage);
    }

    #[test]
    fn test_graph_unknown_node_edge() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("site", ResourceKind::Storage)).unwrap();
        assert_eq!(
            graph.add_edge("site", "ghost").unwrap_err(),
            PlanError::UnknownNode("ghost".to_string())
        );
        assert_eq!(
            graph.add_edge("ghost", "site").unwrap_err(),
            PlanError::UnknownNode("ghost".to_string())
        );
    }

    #[test]
    fn test_graph_unknown_declared_dependency() {
        let result = DependencyGraph::from_nodes([
            node("oai", ResourceKind::AccessIdentity).with_dependency("missing")
        ]);
        assert_eq!(
            result.unwrap_err(),
            PlanError::UnknownNode("missing".to_string())
        );
    }

    #[test]
    fn test_graph_cycle_rejected_and_graph_unchanged() {
        let mut graph = DependencyGraph::from_nodes([
            node("a", ResourceKind::Storage),
            node("b", ResourceKind::Storage).with_dependency("a"),
            node("c", ResourceKind::Storage).with_dependency("b"),
        ])
        .unwrap();
        let edges_before = graph.edge_count();

        let err = graph.add_edge("c", "a").unwrap_err();
        assert_eq!(
            err,
            PlanError::CycleDetected(vec![
                "c".to_string(),
                "a".to_string(),
                "b".to_string(),
                "c".to_string()
            ])
        );
        assert_eq!(graph.edge_count(), edges_before);
        assert!(!graph.has_edge("c", "a"));
        assert_eq!(graph.topological_order().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_graph_self_edge_is_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_node(node("a", ResourceKind::Storage)).unwrap();
        assert!(matches!(
            graph.add_edge("a", "a"),
            Err(PlanError::CycleDetected(_))
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_graph_duplicate_edge_noop() {
        let mut graph = DependencyGraph::from_nodes([
            node("a", ResourceKind::Storage),
            node("b", ResourceKind::Storage).with_dependency("a"),
        ])
        .unwrap();
        graph.add_edge("a", "b").unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_graph_topological_order_revalidates() {
        let mut graph = DependencyGraph::from_nodes([
            node("a", ResourceKind::Storage),
            node("b", ResourceKind::Storage).with_dependency("a"),
            node("free", ResourceKind::Storage),
        ])
        .unwrap();
        // Bypass add_edge to plant a cycle
        graph.dependencies.get_mut("a").unwrap().insert("b".to_string());
        graph.dependents.get_mut("b").unwrap().insert("a".to_string());

        match graph.topological_order() {
            Err(PlanError::CycleDetected(cycle)) => {
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
                assert!(!cycle.contains(&"free".to_string()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_graph_static_website_scenario() {
        let graph = DependencyGraph::from_nodes([
            node("site", ResourceKind::Storage),
            node("oai", ResourceKind::AccessIdentity).with_dependency("site"),
            node("cert", ResourceKind::Certificate),
            node("dist", ResourceKind::CdnDistribution)
                .with_dependency("site")
                .with_dependency("oai")
                .with_dependency("cert"),
            node("a", ResourceKind::DnsRecord).with_dependency("dist"),
            node("aaaa", ResourceKind::DnsRecord).with_dependency("dist"),
            node("deploy", ResourceKind::Deployment).with_dependency("dist"),
        ])
        .unwrap();
        let order = graph.topological_order().unwrap();
        assert_eq!(order.len(), 7);
        assert!(position(&order, "site") < position(&order, "oai"));
        assert!(position(&order, "oai") < position(&order, "dist"));
        assert!(position(&order, "cert") < position(&order, "dist"));
        for leaf in ["a", "aaaa", "deploy"] {
            assert!(position(&order, "dist") < position(&order, leaf));
        }
    }

    #[test]
    fn test_graph_transitive_dependents() {
        let graph = DependencyGraph::from_nodes([
            node("cert", ResourceKind::Certificate),
            node("dist", ResourceKind::CdnDistribution).with_dependency("cert"),
            node("a", ResourceKind::DnsRecord).with_dependency("dist"),
            node("bucket", ResourceKind::Storage),
        ])
        .unwrap();
        let downstream = graph.transitive_dependents("cert");
        assert_eq!(
            downstream.into_iter().collect::<Vec<_>>(),
            vec!["dist", "a"]
        );
        assert!(graph.transitive_dependents("bucket").is_empty());
    }

    proptest! {
        #[test]
        fn prop_topological_order_respects_edges(
            (n, rank, edges) in (2usize..24).prop_flat_map(|n| (
                Just(n),
                Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
                prop::collection::vec((0..n, 0..n), 0..n * 2),
            ))
        ) {
            let mut graph = DependencyGraph::new();
            for i in 0..n {
                graph.add_node(node(&format!("n{i}"), ResourceKind::Storage)).unwrap();
            }
            for (a, b) in edges {
                if a == b {
                    continue;
                }
                // Orient every edge along the random rank so the graph stays acyclic
                let (from, to) = if rank[a] < rank[b] { (a, b) } else { (b, a) };
                graph.add_edge(&format!("n{from}"), &format!("n{to}")).unwrap();
            }

            let order = graph.topological_order().unwrap();
            prop_assert_eq!(order.len(), n);
            let pos: HashMap<&str, usize> =
                order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
            for node in graph.nodes() {
                for dep in graph.dependencies_of(&node.id).unwrap() {
                    prop_assert!(pos[dep.as_str()] < pos[node.id.as_str()]);
                }
            }

            // Reversing any existing edge must be refused without side effects
            let edges_before = graph.edge_count();
            let existing: Vec<(String, String)> = graph
                .nodes()
                .flat_map(|n| {
                    graph.dependencies_of(&n.id).unwrap().iter()
                        .map(|d| (d.clone(), n.id.clone()))
                        .collect::<Vec<_>>()
                })
                .collect();
            for (from, to) in existing {
                let refused = matches!(
                    graph.add_edge(&to, &from),
                    Err(PlanError::CycleDetected(_))
                );
                prop_assert!(refused);
                prop_assert_eq!(graph.edge_count(), edges_before);
            }
        }
    }
}
