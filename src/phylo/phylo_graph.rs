use anyhow::{anyhow, Result};
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::Undirected;
use std::collections::HashMap;

use crate::algorithms::geometry::Pt;

pub const DEFAULT_WEIGHT: f64 = 1.0;

/// Node payload. `adjacency` is the planar rotation: incident edges in
/// counter-clockwise order.
#[derive(Debug, Clone, Default)]
pub struct NodeData {
    pub label: Option<String>,
    pub taxa: Vec<usize>,
    pub adjacency: Vec<EdgeIndex>,
    pub location: Option<Pt>,
}

/// Edge payload. `split` is 0 when the edge carries no split.
#[derive(Debug, Clone)]
pub struct EdgeData {
    pub label: Option<String>,
    pub weight: f64,
    pub split: i32,
    pub angle: f64,
}

impl Default for EdgeData {
    fn default() -> Self {
        Self {
            label: None,
            weight: DEFAULT_WEIGHT,
            split: 0,
            angle: 0.0,
        }
    }
}

/// Phylogenetic graph built on petgraph::StableGraph, with a rotation system
/// and a taxon → node map.
#[derive(Debug, Clone, Default)]
pub struct PhyloGraph {
    pub graph: StableGraph<NodeData, EdgeData, Undirected>,
    taxon2node: HashMap<usize, NodeIndex>,
}

impl PhyloGraph {
    /* ---------------- ctor / housekeeping ---------------- */

    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /* ---------------- nodes ---------------- */

    pub fn new_node(&mut self) -> NodeIndex {
        self.graph.add_node(NodeData::default())
    }

    pub fn new_node_with_label<S: Into<String>>(&mut self, label: S) -> NodeIndex {
        self.graph.add_node(NodeData {
            label: Some(label.into()),
            ..Default::default()
        })
    }

    pub fn set_node_label<S: Into<String>>(&mut self, v: NodeIndex, label: S) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            nd.label = Some(label.into());
        }
    }

    pub fn node_label(&self, v: NodeIndex) -> Option<&str> {
        self.graph.node_weight(v).and_then(|nd| nd.label.as_deref())
    }

    pub fn location(&self, v: NodeIndex) -> Option<Pt> {
        self.graph.node_weight(v).and_then(|nd| nd.location)
    }

    pub fn set_location(&mut self, v: NodeIndex, p: Pt) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            nd.location = Some(p);
        }
    }

    /// Remove a node, its incident edges and its taxa.
    pub fn remove_node(&mut self, v: NodeIndex) -> bool {
        for e in self.adjacent_edges(v).to_vec() {
            self.remove_edge(e);
        }
        self.clear_taxa_for_node(v);
        self.graph.remove_node(v).is_some()
    }

    /* ---------------- edges and rotations ---------------- */

    /// New edge appended to the end of both rotations.
    pub fn new_edge(&mut self, u: NodeIndex, v: NodeIndex) -> Result<EdgeIndex> {
        self.new_edge_after(u, None, v)
    }

    /// New edge `u-v`, placed right after `after` in the rotation at `u`
    /// (appended when `after` is `None` or not incident to `u`) and appended at `v`.
    pub fn new_edge_after(
        &mut self,
        u: NodeIndex,
        after: Option<EdgeIndex>,
        v: NodeIndex,
    ) -> Result<EdgeIndex> {
        if u == v {
            return Err(anyhow!("Illegal self-edge at node {}", u.index()));
        }
        if !self.graph.contains_node(u) || !self.graph.contains_node(v) {
            return Err(anyhow!("Edge endpoint {} or {} does not exist", u.index(), v.index()));
        }
        let e = self.graph.add_edge(u, v, EdgeData::default());
        let rot_u = &mut self.graph[u].adjacency;
        match after.and_then(|a| rot_u.iter().position(|&x| x == a)) {
            Some(pos) => rot_u.insert(pos + 1, e),
            None => rot_u.push(e),
        }
        self.graph[v].adjacency.push(e);
        Ok(e)
    }

    /// Swap `old` for `new` in the rotation at `v`, keeping its position.
    pub(crate) fn replace_in_rotation(&mut self, v: NodeIndex, old: EdgeIndex, new: EdgeIndex) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            if let Some(slot) = nd.adjacency.iter_mut().find(|x| **x == old) {
                *slot = new;
            }
        }
    }

    /// Append `e` to the rotation at `v` unless it is already there.
    pub(crate) fn push_to_rotation(&mut self, v: NodeIndex, e: EdgeIndex) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            if !nd.adjacency.contains(&e) {
                nd.adjacency.push(e);
            }
        }
    }

    /// Replace `f = keep-x` by a new edge `keep-to` with the same payload.
    /// The new edge takes `f`'s place in the rotation at `keep`; the caller
    /// places it in the rotation at `to`.
    pub(crate) fn reattach_edge(
        &mut self,
        f: EdgeIndex,
        keep: NodeIndex,
        to: NodeIndex,
    ) -> Result<EdgeIndex> {
        let data = self
            .graph
            .edge_weight(f)
            .cloned()
            .ok_or_else(|| anyhow!("Edge {} does not exist", f.index()))?;
        let other = self.opposite(keep, f)?;
        if keep == to {
            return Err(anyhow!("Illegal self-edge at node {}", to.index()));
        }
        let g = self.graph.add_edge(keep, to, data);
        self.replace_in_rotation(keep, f, g);
        if let Some(nd) = self.graph.node_weight_mut(other) {
            nd.adjacency.retain(|&x| x != f);
        }
        self.graph.remove_edge(f);
        Ok(g)
    }

    pub fn remove_edge(&mut self, e: EdgeIndex) {
        if let Some((a, b)) = self.graph.edge_endpoints(e) {
            for v in [a, b] {
                if let Some(nd) = self.graph.node_weight_mut(v) {
                    nd.adjacency.retain(|&x| x != e);
                }
            }
            self.graph.remove_edge(e);
        }
    }

    /// Rotation at `v`.
    pub fn adjacent_edges(&self, v: NodeIndex) -> &[EdgeIndex] {
        self.graph
            .node_weight(v)
            .map(|nd| nd.adjacency.as_slice())
            .unwrap_or(&[])
    }

    pub fn first_adjacent_edge(&self, v: NodeIndex) -> Option<EdgeIndex> {
        self.adjacent_edges(v).first().copied()
    }

    /// Successor of `e` in the rotation at `v`, wrapping around.
    pub fn next_adjacent_edge_cyclic(&self, v: NodeIndex, e: EdgeIndex) -> Option<EdgeIndex> {
        let rot = self.adjacent_edges(v);
        let pos = rot.iter().position(|&x| x == e)?;
        Some(rot[(pos + 1) % rot.len()])
    }

    pub fn degree(&self, v: NodeIndex) -> usize {
        self.adjacent_edges(v).len()
    }

    /// Returns true if node is a leaf (degree <= 1).
    pub fn is_leaf(&self, v: NodeIndex) -> bool {
        self.degree(v) <= 1
    }

    /// An edge with a degree-1 endpoint.
    pub fn is_leaf_edge(&self, e: EdgeIndex) -> bool {
        self.graph
            .edge_endpoints(e)
            .is_some_and(|(a, b)| self.is_leaf(a) || self.is_leaf(b))
    }

    pub fn opposite(&self, v: NodeIndex, e: EdgeIndex) -> Result<NodeIndex> {
        match self.graph.edge_endpoints(e) {
            Some((a, b)) if a == v => Ok(b),
            Some((a, b)) if b == v => Ok(a),
            _ => Err(anyhow!(
                "Edge {} is not incident to node {}",
                e.index(),
                v.index()
            )),
        }
    }

    pub fn set_weight(&mut self, e: EdgeIndex, val: f64) {
        if let Some(ed) = self.graph.edge_weight_mut(e) {
            ed.weight = val;
        }
    }

    pub fn weight(&self, e: EdgeIndex) -> f64 {
        self.graph
            .edge_weight(e)
            .map(|ed| ed.weight)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    pub fn set_edge_label<S: Into<String>>(&mut self, e: EdgeIndex, label: S) {
        if let Some(ed) = self.graph.edge_weight_mut(e) {
            ed.label = Some(label.into());
        }
    }

    pub fn edge_label(&self, e: EdgeIndex) -> Option<&str> {
        self.graph.edge_weight(e).and_then(|ed| ed.label.as_deref())
    }

    /* ---------------- taxa mapping ---------------- */

    pub fn get_taxon_node(&self, taxon: usize) -> Option<NodeIndex> {
        self.taxon2node.get(&taxon).copied()
    }

    pub fn taxa(&self, v: NodeIndex) -> &[usize] {
        self.graph
            .node_weight(v)
            .map(|nd| nd.taxa.as_slice())
            .unwrap_or(&[])
    }

    pub fn number_of_taxa(&self) -> usize {
        self.taxon2node.len()
    }

    /// Add a taxon id to a given node (avoids duplicates).
    pub fn add_taxon(&mut self, v: NodeIndex, taxon: usize) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            if !nd.taxa.contains(&taxon) {
                nd.taxa.push(taxon);
            }
            self.taxon2node.insert(taxon, v);
        }
    }

    /// Clear taxa for a node (remove reverse mappings that point to this node).
    pub fn clear_taxa_for_node(&mut self, v: NodeIndex) {
        if let Some(nd) = self.graph.node_weight_mut(v) {
            for t in nd.taxa.drain(..) {
                if self.taxon2node.get(&t) == Some(&v) {
                    self.taxon2node.remove(&t);
                }
            }
        }
    }

    /// Move taxa and label from `from` onto `to`; labels are joined with ", ".
    pub(crate) fn merge_node_into(&mut self, from: NodeIndex, to: NodeIndex) {
        let taxa = self.taxa(from).to_vec();
        self.clear_taxa_for_node(from);
        for t in taxa {
            self.add_taxon(to, t);
        }
        let from_label = self.node_label(from).filter(|l| !l.is_empty()).map(str::to_string);
        if let Some(fl) = from_label {
            let merged = match self.node_label(to).filter(|l| !l.is_empty()) {
                Some(tl) => format!("{tl}, {fl}"),
                None => fl,
            };
            self.set_node_label(to, merged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(k: usize) -> (PhyloGraph, NodeIndex, Vec<NodeIndex>, Vec<EdgeIndex>) {
        let mut g = PhyloGraph::new();
        let c = g.new_node();
        let mut leaves = vec![];
        let mut edges = vec![];
        for t in 1..=k {
            let v = g.new_node_with_label(format!("t{t}"));
            g.add_taxon(v, t);
            edges.push(g.new_edge(c, v).unwrap());
            leaves.push(v);
        }
        (g, c, leaves, edges)
    }

    #[test]
    fn rotation_follows_insertion_order() {
        let (mut g, c, leaves, edges) = star(3);
        assert_eq!(g.adjacent_edges(c), &edges[..]);
        assert_eq!(g.next_adjacent_edge_cyclic(c, edges[2]), Some(edges[0]));

        let w = g.new_node();
        let h = g.new_edge_after(c, Some(edges[0]), w).unwrap();
        assert_eq!(g.adjacent_edges(c), &[edges[0], h, edges[1], edges[2]]);
        assert_eq!(g.adjacent_edges(w), &[h]);
        assert_eq!(g.opposite(w, h).unwrap(), c);
        assert!(g.opposite(leaves[0], h).is_err());
    }

    #[test]
    fn removing_edges_updates_rotations() {
        let (mut g, c, leaves, edges) = star(3);
        g.remove_edge(edges[1]);
        assert_eq!(g.adjacent_edges(c), &[edges[0], edges[2]]);
        assert!(g.adjacent_edges(leaves[1]).is_empty());

        assert!(g.remove_node(leaves[2]));
        assert_eq!(g.adjacent_edges(c), &[edges[0]]);
        assert_eq!(g.get_taxon_node(3), None);
        assert_eq!(g.number_of_taxa(), 2);
    }

    #[test]
    fn leaf_edges_and_self_edges() {
        let (mut g, c, _leaves, edges) = star(3);
        assert!(g.is_leaf_edge(edges[0]));
        assert!(!g.is_leaf(c));
        assert!(g.new_edge(c, c).is_err());
    }

    #[test]
    fn merging_nodes_moves_taxa_and_joins_labels() {
        let (mut g, c, leaves, _edges) = star(2);
        g.set_node_label(c, "root");
        g.merge_node_into(leaves[0], c);
        assert_eq!(g.taxa(c), &[1]);
        assert_eq!(g.get_taxon_node(1), Some(c));
        assert_eq!(g.node_label(c), Some("root, t1"));

        let v = g.new_node();
        g.merge_node_into(leaves[1], v);
        assert_eq!(g.node_label(v), Some("t2"));
    }
}
