//! Traceability graph over registered artifacts.
//!
//! Links are stored once as directed edges. The reverse view is an index
//! derived while building the graph, never a second copy of the link.

use std::collections::{BTreeSet, HashMap, VecDeque};

use uuid::Uuid;

use super::models::{ArtifactKind, ArtifactRef, LinkType, TraceArtifact, TraceLink};

/// Index into the sorted node list.
pub type NodeIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub link_id: Uuid,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub link_type: LinkType,
}

#[derive(Debug, Default)]
pub struct TraceGraph {
    /// Node references, sorted by kind then id
    nodes: Vec<ArtifactRef>,
    /// Map from node reference to index
    index_map: HashMap<ArtifactRef, NodeIndex>,
    /// Outgoing edges per node
    forward_edges: Vec<Vec<Edge>>,
    /// Incoming edges per node, derived from `forward_edges`
    reverse_edges: Vec<Vec<Edge>>,
}

impl TraceGraph {
    /// Build from registered artifacts and links. Inactive links, and links
    /// whose endpoints are not registered, are ignored.
    pub fn build(artifacts: &[TraceArtifact], links: &[TraceLink]) -> Self {
        let mut nodes: Vec<ArtifactRef> = artifacts.iter().map(|a| a.reference()).collect();
        nodes.sort();
        nodes.dedup();

        let index_map: HashMap<ArtifactRef, NodeIndex> = nodes
            .iter()
            .enumerate()
            .map(|(i, r)| (r.clone(), i))
            .collect();

        let mut forward_edges: Vec<Vec<Edge>> = vec![Vec::new(); nodes.len()];
        let mut reverse_edges: Vec<Vec<Edge>> = vec![Vec::new(); nodes.len()];

        for link in links.iter().filter(|l| l.active) {
            let (Some(&from), Some(&to)) = (index_map.get(&link.source), index_map.get(&link.target))
            else {
                continue;
            };
            let edge = Edge {
                link_id: link.id,
                from,
                to,
                link_type: link.link_type,
            };
            forward_edges[from].push(edge);
            reverse_edges[to].push(edge);
        }

        Self {
            nodes,
            index_map,
            forward_edges,
            reverse_edges,
        }
    }

    pub fn get_index(&self, node: &ArtifactRef) -> Option<NodeIndex> {
        self.index_map.get(node).copied()
    }

    pub fn node(&self, index: NodeIndex) -> &ArtifactRef {
        &self.nodes[index]
    }

    /// Nodes of one kind, in id order.
    pub fn nodes_of(&self, kind: ArtifactKind) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, r)| r.kind == kind)
            .map(|(i, _)| i)
    }

    pub fn outgoing(&self, index: NodeIndex) -> &[Edge] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    pub fn incoming(&self, index: NodeIndex) -> &[Edge] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Nodes of `kind` joined to `index` by a `link_type` edge in either direction.
    pub fn linked(&self, index: NodeIndex, link_type: LinkType, kind: ArtifactKind) -> BTreeSet<NodeIndex> {
        let out = self.outgoing(index).iter().map(|e| (e, e.to));
        let inc = self.incoming(index).iter().map(|e| (e, e.from));
        out.chain(inc)
            .filter(|(e, other)| e.link_type == link_type && self.nodes[*other].kind == kind)
            .map(|(_, other)| other)
            .collect()
    }

    /// Breadth-first search along edge direction.
    pub fn reaches(&self, from: NodeIndex, to: NodeIndex) -> bool {
        if from == to {
            return true;
        }
        let mut visited = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([from]);
        visited[from] = true;

        while let Some(node) = queue.pop_front() {
            for edge in self.outgoing(node) {
                if edge.to == to {
                    return true;
                }
                if !visited[edge.to] {
                    visited[edge.to] = true;
                    queue.push_back(edge.to);
                }
            }
        }
        false
    }

    /// Whether adding `source -> target` would close a cycle.
    pub fn would_create_cycle(&self, source: &ArtifactRef, target: &ArtifactRef) -> bool {
        if source == target {
            return true;
        }
        match (self.get_index(source), self.get_index(target)) {
            (Some(s), Some(t)) => self.reaches(t, s),
            _ => false,
        }
    }
}

#[cfg(test)]
impl TraceGraph {
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn edge_count(&self) -> usize {
        self.forward_edges.iter().map(Vec::len).sum()
    }
}
