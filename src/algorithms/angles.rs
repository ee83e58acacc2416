use anyhow::Result;
use fixedbitset::FixedBitSet;
use petgraph::visit::NodeIndexable;
use std::f64::consts::PI;

use crate::algorithms::geometry::{modulo_two_pi, translate_by_angle, Pt};
use crate::data::splits_blocks::SplitsBlock;
use crate::phylo::phylo_splits_graph::PhyloSplitsGraph;

/// Direction of every split, indexed by split id (index 0 unused).
///
/// With `xp`, `xq` the first and last cycle positions of the part not
/// containing `cycle[1]`, split `s` points at `π (xp + xq) / ntax`.
pub fn assign_angles_to_splits(ntax: usize, splits: &SplitsBlock, cycle: &[usize]) -> Vec<f64> {
    let mut split2angle = vec![0.0f64; splits.nsplits() + 1];
    if ntax == 0 || cycle.len() != ntax + 1 {
        return split2angle;
    }
    let anchor = cycle[1];

    for (s, angle) in split2angle.iter_mut().enumerate().skip(1) {
        let part = splits.get(s).part_not_containing(anchor);
        let mut xp = 0usize;
        let mut xq = 0usize;
        for (i, &t) in cycle.iter().enumerate().skip(2) {
            if part.contains(t) {
                if xp == 0 {
                    xp = i;
                }
                xq = i;
            }
        }
        if xp == 0 {
            continue;
        }
        *angle = modulo_two_pi(PI * (xp + xq) as f64 / ntax as f64);
    }
    split2angle
}

/// Push split angles onto edges; splits in `forbidden_splits` keep their angle.
pub fn assign_angles_to_edges(
    ntax: usize,
    splits: &SplitsBlock,
    cycle: &[usize],
    graph: &mut PhyloSplitsGraph,
    forbidden_splits: Option<&FixedBitSet>,
) {
    let split2angle = assign_angles_to_splits(ntax, splits, cycle);

    let edges: Vec<_> = graph.base.graph.edge_indices().collect();
    for e in edges {
        let sid = graph.get_split(e);
        if sid <= 0 {
            continue;
        }
        let sid = sid as usize;
        if forbidden_splits.is_some_and(|fs| fs.contains(sid)) {
            continue;
        }
        if let Some(&a) = split2angle.get(sid) {
            graph.set_angle(e, a);
        }
    }
}

/// Rotate all angles so that the first edge at taxon 1's node points at π.
pub fn normalize_orientation(graph: &mut PhyloSplitsGraph) {
    let Some(v) = graph.base.get_taxon_node(1) else {
        return;
    };
    let Some(first) = graph.base.first_adjacent_edge(v) else {
        return;
    };
    let delta = PI - graph.get_angle(first);
    let edges: Vec<_> = graph.base.graph.edge_indices().collect();
    for e in edges {
        let a = graph.get_angle(e);
        graph.set_angle(e, modulo_two_pi(a + delta));
    }
}

struct Frame {
    node: petgraph::stable_graph::NodeIndex,
    next: usize,
    entered_by: Option<usize>,
}

/// Place taxon 1's node at the origin and lay out the rest depth-first: each
/// edge is a step of length `weight` (or 1) in the direction of its angle,
/// taken only if its split has not been crossed on the current path.
pub fn assign_coordinates_to_nodes(use_weights: bool, graph: &mut PhyloSplitsGraph) -> Result<()> {
    let Some(start) = graph.base.get_taxon_node(1) else {
        return Ok(());
    };
    graph.base.set_location(start, Pt(0.0, 0.0));

    let mut used = FixedBitSet::with_capacity(graph.max_split_id() as usize + 1);
    let mut seen = FixedBitSet::with_capacity(graph.base.graph.node_bound());
    seen.insert(start.index());
    let mut stack = vec![Frame {
        node: start,
        next: 0,
        entered_by: None,
    }];

    while let Some(top) = stack.last_mut() {
        let v = top.node;
        let Some(&e) = graph.base.adjacent_edges(v).get(top.next) else {
            if let Some(s) = top.entered_by {
                used.set(s, false);
            }
            stack.pop();
            continue;
        };
        top.next += 1;

        let sid = graph.get_split(e).max(0) as usize;
        if used.contains(sid) {
            continue;
        }
        let w = graph.base.opposite(v, e)?;
        let step = if use_weights { graph.base.weight(e) } else { 1.0 };
        let pv = graph.base.location(v).unwrap_or_default();
        graph
            .base
            .set_location(w, translate_by_angle(pv, graph.get_angle(e), step));
        if !seen.contains(w.index()) {
            seen.insert(w.index());
            used.insert(sid);
            stack.push(Frame {
                node: w,
                next: 0,
                entered_by: Some(sid),
            });
        }
    }
    Ok(())
}
