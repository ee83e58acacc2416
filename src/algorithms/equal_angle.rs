use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args};
use fixedbitset::FixedBitSet;
use log::{debug, info};
use petgraph::stable_graph::EdgeIndex;
use serde::Serialize;
use std::time::Instant;

use crate::algorithms::angles::{assign_angles_to_edges, assign_coordinates_to_nodes, normalize_orientation};
use crate::algorithms::collisions::avoid_collisions;
use crate::algorithms::convex_hull::{add_labels_from_taxa, convex_hull_apply_with_used};
use crate::algorithms::daylight::optimize_daylight;
use crate::data::splits_blocks::SplitsBlock;
use crate::error::NetworkError;
use crate::phylo::phylo_splits_graph::{PhyloSplitsGraph, TEMPORARY_SPLIT};
use crate::progress::{self, Progress};
use crate::splits::asplit::ASplit;
use crate::splits::bipartition::{cardinality, first_taxon};
use crate::splits::compatibility::{compute_compatibility, is_circular, Compatibility};
use crate::splits::cycle::{identity_cycle, normalize_cycle};

#[derive(Args, Clone, Debug, Serialize)]
pub struct EqualAngleOpts {
    /// Use split weights as edge lengths (otherwise every edge has length 1).
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub use_weights: bool,
    /// Rounds of daylight optimisation; 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub daylight_iterations: usize,
    /// Separate incident edges that would be drawn on top of each other.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub avoid_collisions: bool,
    /// Insert non-circular splits with the convex hull method.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub run_convex_hull: bool,
    /// Label every split edge with its split label or id.
    #[arg(long, default_value_t = false)]
    pub label_edges: bool,
}

impl Default for EqualAngleOpts {
    fn default() -> Self {
        Self {
            use_weights: true,
            daylight_iterations: 0,
            avoid_collisions: true,
            run_convex_hull: true,
            label_edges: false,
        }
    }
}

/// A laid-out split network.
#[derive(Debug, Clone)]
pub struct EqualAngleResult {
    pub graph: PhyloSplitsGraph,
    /// Split ids drawn in `graph` (1-based).
    pub used_splits: FixedBitSet,
    /// The normalised cycle the network was drawn for.
    pub cycle: Vec<usize>,
}

/// Build and lay out the split network of `splits` over taxa labelled `labels`
/// (taxon `t` is `labels[t - 1]`).
///
/// Stages: initial star, wrapping of circular splits, optional convex hull
/// fallback, angles, optional daylight, orientation, optional collision
/// avoidance, coordinates, optional edge labels. The graph is only returned
/// when every stage succeeds.
pub fn equal_angle_apply(
    opts: &EqualAngleOpts,
    labels: &[String],
    splits: &SplitsBlock,
    progress: Option<&dyn Progress>,
) -> Result<EqualAngleResult> {
    let t0 = Instant::now();
    let ntax = labels.len();
    if ntax == 0 {
        bail!(NetworkError::invalid("cannot draw a network without taxa"));
    }
    splits.validate(ntax)?;

    let cycle = match splits.cycle() {
        Some(c) => normalize_cycle(c)?,
        None => identity_cycle(ntax),
    };

    let mut graph = PhyloSplitsGraph::new();
    let mut used_splits = init_graph(labels, splits, &cycle, &mut graph)?;

    let ordered = get_non_trivial_splits_ordered(splits, ntax);
    if let Some(p) = progress {
        p.set_maximum_progress(ordered.len());
    }
    for (k, &s) in ordered.iter().enumerate() {
        progress::check(progress)?;
        let split = splits.get(s);
        if is_circular(split, &cycle) {
            wrap_split(&mut graph, s, split, &cycle)
                .with_context(|| format!("Wrapping split {}", s))?;
            used_splits.insert(s);
        }
        progress::report(progress, k + 1);
    }
    remove_temporary_trivial_edges(&mut graph)?;

    let drawn = used_splits.count_ones(..);
    if opts.run_convex_hull && drawn < splits.nsplits() {
        debug!(
            "{} of {} splits are not circular, running convex hull",
            splits.nsplits() - drawn,
            splits.nsplits()
        );
        convex_hull_apply_with_used(ntax, splits, &mut graph, &mut used_splits, progress)
            .context("Inserting non-circular splits")?;
        add_labels_from_taxa(&mut graph, labels);
    }

    assign_angles_to_edges(ntax, splits, &cycle, &mut graph, None);

    if opts.daylight_iterations > 0 {
        optimize_daylight(&mut graph, opts.daylight_iterations, opts.use_weights, progress)?;
    }

    normalize_orientation(&mut graph);

    if opts.avoid_collisions {
        let compatibility = match splits.compatibility() {
            Compatibility::Unknown => compute_compatibility(splits.get_splits(), &cycle),
            c => c,
        };
        if !matches!(compatibility, Compatibility::Compatible | Compatibility::Cyclic) {
            avoid_collisions(&mut graph, ntax, progress)?;
        }
    }

    assign_coordinates_to_nodes(opts.use_weights, &mut graph)?;

    if opts.label_edges {
        label_edges(&mut graph, splits);
    }

    info!(
        "Split network: {} nodes, {} edges, {} of {} splits drawn in {:?}",
        graph.count_nodes(),
        graph.count_edges(),
        used_splits.count_ones(..),
        splits.nsplits(),
        t0.elapsed()
    );
    Ok(EqualAngleResult {
        graph,
        used_splits,
        cycle,
    })
}

/// Star graph: one center, one leaf per taxon in cycle order. Leaf edges
/// carry the taxon's trivial split when there is one and `TEMPORARY_SPLIT`
/// otherwise. Returns the set of trivial split ids placed.
pub fn init_graph(
    labels: &[String],
    splits: &SplitsBlock,
    cycle: &[usize],
    graph: &mut PhyloSplitsGraph,
) -> Result<FixedBitSet> {
    let ntax = cycle.len().saturating_sub(1);
    let mut used = FixedBitSet::with_capacity(splits.nsplits() + 1);

    let mut taxon2split = vec![0usize; ntax + 1];
    for (i, split) in splits.splits().enumerate() {
        if split.size() == 1 {
            if let Some(t) = first_taxon(split.smaller_part()) {
                if t <= ntax {
                    taxon2split[t] = i + 1;
                }
            }
        }
    }

    let center = graph.base.new_node();
    for &t in &cycle[1..] {
        let label = labels.get(t - 1).cloned().unwrap_or_default();
        let v = graph.base.new_node_with_label(label);
        graph.base.add_taxon(v, t);
        let e = graph.base.new_edge(center, v)?;
        match taxon2split[t] {
            0 => graph.set_split(e, TEMPORARY_SPLIT),
            s => {
                graph.set_split(e, s as i32);
                graph.base.set_weight(e, splits.get(s).weight);
                used.insert(s);
            }
        }
    }
    Ok(used)
}

/// Ids of splits with both parts of size at least 2, ordered by the size of
/// the part containing taxon 1, ties by id. Splits with larger far parts are
/// wrapped first so that nested splits end up as tree edges.
pub fn get_non_trivial_splits_ordered(splits: &SplitsBlock, ntax: usize) -> Vec<usize> {
    let mut ids: Vec<(usize, usize)> = splits
        .splits()
        .enumerate()
        .filter(|(_, s)| s.size() >= 2 && s.size() <= ntax.saturating_sub(2))
        .map(|(i, s)| (cardinality(s.part_containing(1)), i + 1))
        .collect();
    ids.sort_unstable();
    ids.into_iter().map(|(_, s)| s).collect()
}

/// Insert circular split `s` by walking the outer boundary from the leaf of
/// `xp` to the leaf of `xq`, the first and last taxa of the split's far
/// part in cycle order. Every turn of the walk gets a new node that takes
/// over the run of leaf edges just passed.
pub(crate) fn wrap_split(
    graph: &mut PhyloSplitsGraph,
    s: usize,
    split: &ASplit,
    cycle: &[usize],
) -> Result<()> {
    let part = split.part_not_containing(cycle[1]);
    let mut xp = 0usize;
    let mut xq = 0usize;
    for &t in cycle.iter().skip(2) {
        if part.contains(t) {
            if xp == 0 {
                xp = t;
            }
            xq = t;
        }
    }
    if xp == 0 {
        bail!(NetworkError::invalid(format!(
            "split {} has no taxa apart from taxon {}",
            s, cycle[1]
        )));
    }

    let leaf_edge_of = |graph: &PhyloSplitsGraph, t: usize| {
        graph
            .base
            .get_taxon_node(t)
            .and_then(|v| graph.base.first_adjacent_edge(v).map(|e| (v, e)))
            .ok_or_else(|| anyhow!("taxon {} has no leaf edge", t))
    };
    let (_, target) = leaf_edge_of(graph, xq)?;
    let (v0, mut e) = leaf_edge_of(graph, xp)?;
    let mut v = graph.base.opposite(v0, e)?;
    let mut u = None;
    let mut leaf_edges: Vec<EdgeIndex> = vec![e];
    let mut visited = FixedBitSet::with_capacity(graph.base.graph.node_count() * 2 + 2);

    loop {
        if visited.contains(v.index()) {
            bail!(NetworkError::NodeRevisited {
                split: s,
                node: v.index()
            });
        }
        visited.grow(v.index() + 1);
        visited.insert(v.index());

        let f0 = e;
        let mut f = next_around(graph, v, f0)?;
        let mut reached_target = false;
        while graph.base.is_leaf_edge(f) {
            leaf_edges.push(f);
            if f == target {
                reached_target = true;
                break;
            }
            if f == f0 {
                bail!(NetworkError::Wraparound {
                    split: s,
                    node: v.index(),
                    target: xq
                });
            }
            f = next_around(graph, v, f)?;
        }
        let next_e = (!reached_target).then_some(f);

        let w = graph.base.new_node();
        let h = graph.base.new_edge_after(v, Some(e), w)?;
        graph.set_split(h, s as i32);
        graph.base.set_weight(h, split.weight);

        if let Some(u) = u {
            let h2 = graph.base.new_edge(w, u)?;
            graph.set_split(h2, graph.get_split(e));
            graph.base.set_weight(h2, graph.base.weight(e));
        }

        for f in leaf_edges.drain(..) {
            let x = graph.base.opposite(v, f)?;
            let g = graph.base.reattach_edge(f, x, w)?;
            graph.base.push_to_rotation(w, g);
        }

        match next_e {
            Some(f) => {
                v = graph.base.opposite(v, f)?;
                e = f;
                u = Some(w);
            }
            None => break,
        }
    }
    Ok(())
}

fn next_around(
    graph: &PhyloSplitsGraph,
    v: petgraph::stable_graph::NodeIndex,
    e: EdgeIndex,
) -> Result<EdgeIndex> {
    graph
        .base
        .next_adjacent_edge_cyclic(v, e)
        .ok_or_else(|| anyhow!("edge {} is not in the rotation of node {}", e.index(), v.index()))
}

/// Contract every edge still marked `TEMPORARY_SPLIT`: its leaf end is
/// merged into the other end and deleted.
pub fn remove_temporary_trivial_edges(graph: &mut PhyloSplitsGraph) -> Result<()> {
    let temporary: Vec<EdgeIndex> = graph
        .base
        .graph
        .edge_indices()
        .filter(|&e| graph.get_split(e) == TEMPORARY_SPLIT)
        .collect();
    for e in temporary {
        let Some((a, b)) = graph.base.graph.edge_endpoints(e) else {
            continue;
        };
        let is_leaf_end = |v| graph.base.degree(v) == 1 && !graph.base.taxa(v).is_empty();
        let (leaf, other) = if is_leaf_end(b) {
            (b, a)
        } else if is_leaf_end(a) {
            (a, b)
        } else {
            debug!("Temporary edge {} has no leaf end, kept", e.index());
            continue;
        };
        graph.base.merge_node_into(leaf, other);
        graph.base.remove_edge(e);
        graph.base.remove_node(leaf);
    }
    Ok(())
}

/// Label each split edge with the split's label, or its id when unlabelled.
fn label_edges(graph: &mut PhyloSplitsGraph, splits: &SplitsBlock) {
    let edges: Vec<_> = graph.base.graph.edge_indices().collect();
    for e in edges {
        let s = graph.get_split(e);
        if s <= 0 || s as usize > splits.nsplits() {
            continue;
        }
        let label = splits
            .split_label(s as usize)
            .map(str::to_string)
            .unwrap_or_else(|| s.to_string());
        graph.base.set_edge_label(e, label);
    }
}
