use petgraph::stable_graph::EdgeIndex;
use serde::Serialize;

use crate::phylo::phylo_graph::PhyloGraph;

/// Split id of a pendant edge that has no trivial split behind it yet.
pub const TEMPORARY_SPLIT: i32 = -1;

/// Splits graph: a `PhyloGraph` whose edges carry split ids and angles.
#[derive(Debug, Clone, Default)]
pub struct PhyloSplitsGraph {
    pub base: PhyloGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: usize,
    pub label: Option<String>,
    pub taxa: Vec<usize>,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeSnapshot {
    pub id: usize,
    pub source: usize,
    pub target: usize,
    pub split: i32,
    pub weight: f64,
    pub angle: f64,
    pub label: Option<String>,
}

/// Plain view of a laid-out network for rendering consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSnapshot {
    pub nodes: Vec<NodeSnapshot>,
    pub edges: Vec<EdgeSnapshot>,
}

impl PhyloSplitsGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /* ---------------- edge split-id / angle ---------------- */

    pub fn set_split(&mut self, e: EdgeIndex, id: i32) {
        if let Some(ed) = self.base.graph.edge_weight_mut(e) {
            ed.split = id;
        }
    }
    pub fn get_split(&self, e: EdgeIndex) -> i32 {
        self.base.graph.edge_weight(e).map(|ed| ed.split).unwrap_or(0)
    }

    pub fn set_angle(&mut self, e: EdgeIndex, val: f64) {
        if let Some(ed) = self.base.graph.edge_weight_mut(e) {
            ed.angle = val;
        }
    }
    pub fn get_angle(&self, e: EdgeIndex) -> f64 {
        self.base.graph.edge_weight(e).map(|ed| ed.angle).unwrap_or(0.0)
    }

    pub fn max_split_id(&self) -> i32 {
        self.base
            .graph
            .edge_indices()
            .map(|e| self.get_split(e))
            .max()
            .unwrap_or(0)
            .max(0)
    }

    pub fn edges_of_split(&self, split_id: i32) -> Vec<EdgeIndex> {
        self.base
            .graph
            .edge_indices()
            .filter(|&e| self.get_split(e) == split_id)
            .collect()
    }

    pub fn count_nodes(&self) -> usize {
        self.base.node_count()
    }

    pub fn count_edges(&self) -> usize {
        self.base.edge_count()
    }

    /* ---------------- output ---------------- */

    pub fn snapshot(&self) -> NetworkSnapshot {
        let g = &self.base.graph;
        let nodes = g
            .node_indices()
            .map(|v| {
                let nd = &g[v];
                let p = nd.location.unwrap_or_default();
                NodeSnapshot {
                    id: v.index(),
                    label: nd.label.clone(),
                    taxa: nd.taxa.clone(),
                    x: p.0,
                    y: p.1,
                }
            })
            .collect();
        let edges = g
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = g.edge_endpoints(e)?;
                let ed = &g[e];
                Some(EdgeSnapshot {
                    id: e.index(),
                    source: a.index(),
                    target: b.index(),
                    split: ed.split,
                    weight: ed.weight,
                    angle: ed.angle,
                    label: ed.label.clone(),
                })
            })
            .collect();
        NetworkSnapshot { nodes, edges }
    }
}

#[cfg(test)]
mod phylo_splits_graph_tests {
    use super::*;
    use petgraph::stable_graph::NodeIndex;
    use pretty_assertions::assert_eq;

    /// A-B-C where AB carries split 99 and BC split 5; taxa 1,2,3 on A,B,C.
    fn make_abc() -> (PhyloSplitsGraph, NodeIndex, NodeIndex, NodeIndex, EdgeIndex, EdgeIndex) {
        let mut g = PhyloSplitsGraph::new();

        let a = g.base.new_node_with_label("A");
        let b = g.base.new_node_with_label("B");
        let c = g.base.new_node_with_label("C");
        g.base.add_taxon(a, 1);
        g.base.add_taxon(b, 2);
        g.base.add_taxon(c, 3);

        let e_ab = g.base.new_edge(a, b).unwrap();
        g.set_split(e_ab, 99);
        g.set_angle(e_ab, 0.1);
        g.base.set_weight(e_ab, 2.0);

        let e_bc = g.base.new_edge(b, c).unwrap();
        g.set_split(e_bc, 5);
        g.set_angle(e_bc, 0.2);
        g.base.set_weight(e_bc, 3.0);

        (g, a, b, c, e_ab, e_bc)
    }

    #[test]
    fn split_and_angle_attributes() {
        let (mut g, _a, _b, _c, e_ab, e_bc) = make_abc();
        assert_eq!(g.get_split(e_ab), 99);
        assert_eq!(g.get_angle(e_bc), 0.2);
        assert_eq!(g.max_split_id(), 99);
        assert_eq!(g.edges_of_split(5), vec![e_bc]);

        g.set_split(e_bc, TEMPORARY_SPLIT);
        assert!(g.edges_of_split(5).is_empty());
        assert_eq!(g.edges_of_split(TEMPORARY_SPLIT), vec![e_bc]);
    }

    #[test]
    fn snapshot_lists_nodes_and_edges() {
        let (g, _a, _b, _c, _e_ab, _e_bc) = make_abc();
        let snap = g.snapshot();
        assert_eq!(snap.nodes.len(), 3);
        assert_eq!(snap.edges.len(), 2);
        assert_eq!(snap.nodes[1].taxa, vec![2]);
        assert_eq!(snap.edges[0].split, 99);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"split\":5"));
    }
}
