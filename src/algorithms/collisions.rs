use anyhow::Result;
use fixedbitset::FixedBitSet;
use log::debug;
use petgraph::visit::NodeIndexable;
use std::collections::BTreeSet;
use std::f64::consts::PI;

use crate::algorithms::geometry::{angular_distance, modulo_two_pi};
use crate::phylo::phylo_splits_graph::PhyloSplitsGraph;
use crate::progress::{self, Progress};

/// Two incident edges closer than this (radians) collide.
pub const COLLISION_TOLERANCE: f64 = 1e-7;

/// Walk the graph depth-first from taxon 1's node. Whenever two edges at a
/// node point the same way, turn every edge of one of their splits by the
/// smallest multiple of `0.2π / ntax` that clears all edges meeting that
/// split. A turned split never lands on another edge, so each split is turned
/// at most once. Returns the number of splits turned.
pub fn avoid_collisions(
    graph: &mut PhyloSplitsGraph,
    ntax: usize,
    progress: Option<&dyn Progress>,
) -> Result<usize> {
    let Some(start) = graph.base.get_taxon_node(1) else {
        return Ok(0);
    };
    let delta = 0.2 * PI / ntax.max(1) as f64;
    // a full turn
    let max_steps = 10 * ntax.max(1);
    let mut nudged: BTreeSet<i32> = BTreeSet::new();

    let mut seen = FixedBitSet::with_capacity(graph.base.graph.node_bound());
    seen.insert(start.index());
    let mut stack = vec![start];

    while let Some(v) = stack.pop() {
        progress::check(progress)?;
        let rot = graph.base.adjacent_edges(v).to_vec();
        for i in 0..rot.len() {
            for j in (i + 1)..rot.len() {
                let (a, b) = (graph.get_angle(rot[i]), graph.get_angle(rot[j]));
                if angular_distance(a, b) >= COLLISION_TOLERANCE {
                    continue;
                }
                let (si, sj) = (graph.get_split(rot[i]), graph.get_split(rot[j]));
                if si == sj {
                    continue;
                }
                let Some(s) = [sj, si].into_iter().find(|s| !nudged.contains(s)) else {
                    continue;
                };
                match clear_turn(graph, s, delta, max_steps) {
                    Some(turn) => {
                        for e in graph.edges_of_split(s) {
                            let a = graph.get_angle(e);
                            graph.set_angle(e, modulo_two_pi(a + turn));
                        }
                        nudged.insert(s);
                    }
                    None => debug!("No free direction for split {} at node {}", s, v.index()),
                }
            }
        }
        for &e in rot.iter().rev() {
            let w = graph.base.opposite(v, e)?;
            if !seen.contains(w.index()) {
                seen.insert(w.index());
                stack.push(w);
            }
        }
    }

    if !nudged.is_empty() {
        debug!("Collision avoidance turned {} splits", nudged.len());
    }
    Ok(nudged.len())
}

/// Smallest positive multiple of `delta` that keeps every edge of split `s`
/// clear of the other edges at both of its ends.
fn clear_turn(graph: &PhyloSplitsGraph, s: i32, delta: f64, max_steps: usize) -> Option<f64> {
    let mut pairs: Vec<(f64, f64)> = Vec::new();
    for e in graph.edges_of_split(s) {
        let Some((x, y)) = graph.base.graph.edge_endpoints(e) else {
            continue;
        };
        let own = graph.get_angle(e);
        for v in [x, y] {
            for &f in graph.base.adjacent_edges(v) {
                if graph.get_split(f) != s {
                    pairs.push((own, graph.get_angle(f)));
                }
            }
        }
    }
    (1..max_steps).map(|k| k as f64 * delta).find(|&turn| {
        pairs
            .iter()
            .all(|&(own, other)| angular_distance(modulo_two_pi(own + turn), other) >= COLLISION_TOLERANCE)
    })
}
