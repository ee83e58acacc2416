use anyhow::Result;
use fixedbitset::FixedBitSet;
use log::debug;
use petgraph::stable_graph::{EdgeIndex, NodeIndex};
use petgraph::visit::NodeIndexable;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::f64::consts::PI;

use crate::algorithms::angles::assign_coordinates_to_nodes;
use crate::algorithms::geometry::{compute_angle, compute_observed_angle, modulo_two_pi, Pt};
use crate::phylo::phylo_splits_graph::PhyloSplitsGraph;
use crate::progress::{self, Progress};

/// Result of looking at one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DaylightStep {
    Rotated,
    /// Components already use at least 2π.
    NoSlack,
    /// Removing the node leaves the graph connected; never worth revisiting.
    Skip,
}

/// Visibility components around one node: the edge → component map and the
/// observed angular range of each component.
pub(crate) struct Components {
    pub edge2comp: HashMap<EdgeIndex, usize>,
    pub ranges: Vec<(f64, f64)>,
}

impl Components {
    pub fn total_span(&self) -> f64 {
        self.ranges.iter().map(|(lo, hi)| hi - lo).sum()
    }
}

/// Flood-fill the graph minus `v` once per incident edge, tracking the angle
/// under which each reached node is seen from `v`.
pub(crate) fn visibility_components(graph: &PhyloSplitsGraph, v: NodeIndex) -> Result<Components> {
    let g = &graph.base;
    let loc = |x: NodeIndex| g.location(x).unwrap_or_default();
    let pv = loc(v);

    let mut edge2comp: HashMap<EdgeIndex, usize> = HashMap::new();
    let mut ranges = Vec::new();
    let mut visited = FixedBitSet::with_capacity(g.graph.node_bound());
    visited.insert(v.index());

    for &e in g.adjacent_edges(v) {
        if edge2comp.contains_key(&e) {
            continue;
        }
        let c = ranges.len();
        edge2comp.insert(e, c);
        let w = g.opposite(v, e)?;
        let pw = loc(w);
        let start = compute_angle(Pt(pw.0 - pv.0, pw.1 - pv.1));
        let (mut lo, mut hi) = (start, start);

        visited.insert(w.index());
        let mut stack = vec![(w, start)];
        while let Some((x, ax)) = stack.pop() {
            for &f in g.adjacent_edges(x) {
                if edge2comp.contains_key(&f) {
                    continue;
                }
                edge2comp.insert(f, c);
                let y = g.opposite(x, f)?;
                if y == v {
                    continue;
                }
                let ay = ax + compute_observed_angle(pv, loc(x), loc(y));
                lo = lo.min(ay);
                hi = hi.max(ay);
                if !visited.contains(y.index()) {
                    visited.insert(y.index());
                    stack.push((y, ay));
                }
            }
        }
        ranges.push((lo, hi));
    }
    Ok(Components { edge2comp, ranges })
}

/// Spread the unused angle around `v` evenly between its components.
pub(crate) fn optimize_daylight_node(graph: &mut PhyloSplitsGraph, v: NodeIndex) -> Result<DaylightStep> {
    let comps = visibility_components(graph, v)?;
    let k = comps.ranges.len();
    if k <= 1 {
        return Ok(DaylightStep::Skip);
    }
    let total = comps.total_span();
    if total >= 2.0 * PI {
        return Ok(DaylightStep::NoSlack);
    }
    let daylight = (2.0 * PI - total) / k as f64;

    let mut epsilon = Vec::with_capacity(k);
    let mut alpha = comps.ranges[0].0;
    for &(lo, hi) in &comps.ranges {
        epsilon.push(alpha - lo);
        alpha += (hi - lo) + daylight;
    }

    for (&e, &c) in &comps.edge2comp {
        if epsilon[c] != 0.0 {
            let a = graph.get_angle(e);
            graph.set_angle(e, modulo_two_pi(a + epsilon[c]));
        }
    }
    Ok(DaylightStep::Rotated)
}

/// Daylight optimisation: `iterations` sweeps over the nodes in a shuffled
/// order seeded by `77 * iteration`, re-laying out coordinates before each node.
pub fn optimize_daylight(
    graph: &mut PhyloSplitsGraph,
    iterations: usize,
    use_weights: bool,
    progress: Option<&dyn Progress>,
) -> Result<()> {
    let mut skip = FixedBitSet::with_capacity(graph.base.graph.node_bound());
    let mut rotated = 0usize;

    for it in 0..iterations {
        let mut nodes: Vec<NodeIndex> = graph.base.graph.node_indices().collect();
        let mut rng = StdRng::seed_from_u64(77 * it as u64);
        nodes.shuffle(&mut rng);

        for v in nodes {
            progress::check(progress)?;
            if graph.base.degree(v) <= 2 || skip.contains(v.index()) {
                continue;
            }
            assign_coordinates_to_nodes(use_weights, graph)?;
            match optimize_daylight_node(graph, v)? {
                DaylightStep::Rotated => rotated += 1,
                DaylightStep::Skip => skip.insert(v.index()),
                DaylightStep::NoSlack => {}
            }
        }
    }
    debug!(
        "Daylight: {} node rotations over {} iterations, {} nodes skipped",
        rotated,
        iterations,
        skip.count_ones(..)
    );
    assign_coordinates_to_nodes(use_weights, graph)
}
