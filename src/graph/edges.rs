//! Edge sets and topology diffing
//!
//! The builder never mutates wiring directly. It synthesizes the complete
//! set of edges the current configuration needs and the graph applies only
//! the difference against what is already connected.

use std::collections::BTreeSet;

use serde::Serialize;

use super::NodeId;

/// Directed connection from one node's output port to another's input port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Edge {
    pub from: NodeId,
    pub output: usize,
    pub to: NodeId,
    pub input: usize,
}

impl Edge {
    /// Edge between the first ports of both nodes
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self::ports(from, 0, to, 0)
    }

    /// Edge between explicit ports
    pub fn ports(from: NodeId, output: usize, to: NodeId, input: usize) -> Self {
        Self {
            from,
            output,
            to,
            input,
        }
    }

    /// True if the edge starts or ends at `node`
    pub fn touches(&self, node: NodeId) -> bool {
        self.from == node || self.to == node
    }
}

/// Ordered set of edges
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EdgeSet {
    edges: BTreeSet<Edge>,
}

impl EdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `from -> to` on port 0
    pub fn link(&mut self, from: NodeId, to: NodeId) -> &mut Self {
        self.edges.insert(Edge::new(from, to));
        self
    }

    /// Add an edge with explicit ports
    pub fn link_ports(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> &mut Self {
        self.edges.insert(Edge::ports(from, output, to, input));
        self
    }

    /// Link each node to the next one in `path`
    pub fn chain(&mut self, path: &[NodeId]) -> &mut Self {
        for pair in path.windows(2) {
            self.link(pair[0], pair[1]);
        }
        self
    }

    pub fn insert(&mut self, edge: Edge) -> bool {
        self.edges.insert(edge)
    }

    pub fn remove(&mut self, edge: &Edge) -> bool {
        self.edges.remove(edge)
    }

    pub fn extend(&mut self, other: &EdgeSet) {
        self.edges.extend(other.edges.iter().copied());
    }

    pub fn contains(&self, edge: &Edge) -> bool {
        self.edges.contains(edge)
    }

    /// True if `from -> to` exists on any ports
    pub fn connects(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Remove every edge touching `node`, returning how many were removed
    pub fn estrange(&mut self, node: NodeId) -> usize {
        let before = self.edges.len();
        self.edges.retain(|e| !e.touches(node));
        before - self.edges.len()
    }

    /// Edges feeding `node`
    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.to == node)
    }

    /// Edges leaving `node`
    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(move |e| e.from == node)
    }

    /// Compute what must change to turn `self` into `desired`
    ///
    /// Returns `(to_remove, to_add)`.
    pub fn diff(&self, desired: &EdgeSet) -> (Vec<Edge>, Vec<Edge>) {
        let to_remove = self.edges.difference(&desired.edges).copied().collect();
        let to_add = desired.edges.difference(&self.edges).copied().collect();
        (to_remove, to_add)
    }
}

impl FromIterator<Edge> for EdgeSet {
    fn from_iter<I: IntoIterator<Item = Edge>>(iter: I) -> Self {
        Self {
            edges: iter.into_iter().collect(),
        }
    }
}

/// Outcome of applying a desired edge set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EdgeDelta {
    pub added: usize,
    pub removed: usize,
}

impl EdgeDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> (NodeId, NodeId, NodeId) {
        (NodeId(0), NodeId(1), NodeId(2))
    }

    #[test]
    fn test_chain_links_consecutive_nodes() {
        let (a, b, c) = ids();
        let mut set = EdgeSet::new();
        set.chain(&[a, b, c]);
        assert_eq!(set.len(), 2);
        assert!(set.connects(a, b));
        assert!(set.connects(b, c));
        assert!(!set.connects(a, c));
    }

    #[test]
    fn test_diff_only_reports_delta() {
        let (a, b, c) = ids();
        let mut current = EdgeSet::new();
        current.chain(&[a, b, c]);
        let mut desired = EdgeSet::new();
        desired.link(a, b).link(a, c);

        let (remove, add) = current.diff(&desired);
        assert_eq!(remove, vec![Edge::new(b, c)]);
        assert_eq!(add, vec![Edge::new(a, c)]);

        let (remove, add) = desired.diff(&desired.clone());
        assert!(remove.is_empty() && add.is_empty());
    }

    #[test]
    fn test_estrange_removes_both_directions() {
        let (a, b, c) = ids();
        let mut set = EdgeSet::new();
        set.chain(&[a, b, c]).link(a, c);
        assert_eq!(set.estrange(b), 2);
        assert_eq!(set.len(), 1);
        assert_eq!(set.incoming(c).count(), 1);
        assert_eq!(set.outgoing(b).count(), 0);
    }
}
