use anyhow::{bail, Result};
use fixedbitset::FixedBitSet;
use log::debug;
use petgraph::prelude::{EdgeIndex, NodeIndex};
use std::collections::HashMap;

use crate::data::splits_blocks::SplitsBlock;
use crate::error::NetworkError;
use crate::phylo::phylo_splits_graph::PhyloSplitsGraph;
use crate::progress::{self, Progress};
use crate::splits::bipartition::join_members;

/// Hull membership of a node while one split is being inserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hull {
    SideB,
    SideA,
    Both,
}

impl Hull {
    fn of_side(side_a: bool) -> Self {
        if side_a {
            Hull::SideA
        } else {
            Hull::SideB
        }
    }
}

/// Insert every split of `splits` that is not yet in `used_splits` by the
/// convex hull method. `used_splits` is indexed by 1-based split id and is
/// updated in place. An empty graph starts as a single node holding all taxa.
///
/// Returns the number of splits inserted.
pub fn convex_hull_apply_with_used(
    ntax: usize,
    splits: &SplitsBlock,
    graph: &mut PhyloSplitsGraph,
    used_splits: &mut FixedBitSet,
    progress: Option<&dyn Progress>,
) -> Result<usize> {
    used_splits.grow(splits.nsplits() + 1);
    let order = get_order_to_process_splits_in(splits, used_splits);
    if order.is_empty() {
        return Ok(0);
    }

    if graph.base.node_count() == 0 {
        let v = graph.base.new_node();
        for t in 1..=ntax {
            graph.base.add_taxon(v, t);
        }
    }

    for &j in &order {
        progress::check(progress)?;
        insert_split(ntax, splits, graph, used_splits, j)?;
        used_splits.insert(j);
    }

    debug!("Convex hull inserted {} splits", order.len());
    Ok(order.len())
}

fn insert_split(
    ntax: usize,
    splits: &SplitsBlock,
    graph: &mut PhyloSplitsGraph,
    used_splits: &FixedBitSet,
    j: usize,
) -> Result<()> {
    let sj = splits.get(j);
    let part_a = sj.get_a();

    // used splits that still divide side B (resp. side A) of split j
    let mut splits0 = FixedBitSet::with_capacity(splits.nsplits() + 1);
    let mut splits1 = FixedBitSet::with_capacity(splits.nsplits() + 1);
    for i in used_splits.ones().filter(|&i| i >= 1 && i <= splits.nsplits()) {
        for (side, set) in [(false, &mut splits0), (true, &mut splits1)] {
            if splits.intersect2(j, side, i, true).count_ones(..) > 0
                && splits.intersect2(j, side, i, false).count_ones(..) > 0
            {
                set.insert(i);
            }
        }
    }

    let mut start0 = None;
    let mut start1 = None;
    for t in 1..=ntax {
        if part_a.contains(t) {
            start1 = graph.base.get_taxon_node(t);
        } else {
            start0 = graph.base.get_taxon_node(t);
        }
        if start0.is_some() && start1.is_some() {
            break;
        }
    }
    let (Some(start0), Some(start1)) = (start0, start1) else {
        bail!(NetworkError::invalid(format!(
            "split {} has a side with no taxon node in the graph",
            j
        )));
    };

    let mut hulls: HashMap<NodeIndex, Hull> = HashMap::new();
    let mut intersection_nodes: Vec<NodeIndex> = Vec::new();
    hulls.insert(start0, Hull::SideB);
    if start0 == start1 {
        hulls.insert(start1, Hull::Both);
        intersection_nodes.push(start1);
    } else {
        hulls.insert(start1, Hull::SideA);
    }
    convex_hull_path(graph, start0, &mut hulls, &splits0, &mut intersection_nodes, false)?;
    convex_hull_path(graph, start1, &mut hulls, &splits1, &mut intersection_nodes, true)?;

    // duplicate each intersection node; A's taxa move to the copy
    let mut duplicate: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
    for &v in &intersection_nodes {
        let v1 = graph.base.new_node();
        let e = graph.base.new_edge(v1, v)?;
        graph.set_split(e, j as i32);
        graph.base.set_weight(e, sj.weight);

        let taxa = graph.base.taxa(v).to_vec();
        graph.base.clear_taxa_for_node(v);
        for t in taxa {
            if part_a.contains(t) {
                graph.base.add_taxon(v1, t);
            } else {
                graph.base.add_taxon(v, t);
            }
        }
        duplicate.insert(v, (v1, e));
    }

    for &v in &intersection_nodes {
        let Some(&(v1, to_v1)) = duplicate.get(&v) else {
            continue;
        };
        for consider in graph.base.adjacent_edges(v).to_vec() {
            if consider == to_v1 {
                continue;
            }
            let w = graph.base.opposite(v, consider)?;
            match hulls.get(&w) {
                Some(Hull::SideA) => {
                    let moved = graph.base.reattach_edge(consider, w, v1)?;
                    graph.base.push_to_rotation(v1, moved);
                }
                Some(Hull::Both) => {
                    let Some(&(w1, _)) = duplicate.get(&w) else {
                        continue;
                    };
                    if graph.base.graph.find_edge(v1, w1).is_none() {
                        let dup = graph.base.new_edge(v1, w1)?;
                        graph.set_split(dup, graph.get_split(consider));
                        graph.base.set_weight(dup, graph.base.weight(consider));
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Grow the hull of one side from `start`, crossing only edges whose split
/// is in `allowed_splits`. A node reached from both sides joins the
/// intersection.
fn convex_hull_path(
    graph: &PhyloSplitsGraph,
    start: NodeIndex,
    hulls: &mut HashMap<NodeIndex, Hull>,
    allowed_splits: &FixedBitSet,
    intersection_nodes: &mut Vec<NodeIndex>,
    side_a: bool,
) -> Result<()> {
    let own = Hull::of_side(side_a);
    let other = Hull::of_side(!side_a);
    let mut seen: Vec<EdgeIndex> = Vec::new();
    let mut stack = vec![start];

    while let Some(v) = stack.pop() {
        for &f in graph.base.adjacent_edges(v) {
            let sid = graph.get_split(f);
            if sid <= 0 || !allowed_splits.contains(sid as usize) || seen.contains(&f) {
                continue;
            }
            seen.push(f);
            let w = graph.base.opposite(v, f)?;
            match hulls.get(&w).copied() {
                None => {
                    hulls.insert(w, own);
                    stack.push(w);
                }
                Some(mark) if mark == other => {
                    hulls.insert(w, Hull::Both);
                    intersection_nodes.push(w);
                    stack.push(w);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Unused split ids by increasing size of the smaller part, ties by id.
fn get_order_to_process_splits_in(splits: &SplitsBlock, used: &FixedBitSet) -> Vec<usize> {
    let mut items: Vec<(usize, usize)> = (1..=splits.nsplits())
        .filter(|&s| !used.contains(s))
        .map(|s| (splits.get(s).size(), s))
        .collect();
    items.sort_unstable();
    items.into_iter().map(|(_, s)| s).collect()
}

/// Label every node that carries taxa with its taxon labels joined by ", ";
/// all other nodes lose their label.
pub fn add_labels_from_taxa(graph: &mut PhyloSplitsGraph, labels: &[String]) {
    let nodes: Vec<_> = graph.base.graph.node_indices().collect();
    for v in nodes {
        let taxa = graph.base.taxa(v);
        let label = if taxa.is_empty() {
            None
        } else {
            let mut bs = FixedBitSet::with_capacity(taxa.iter().max().map_or(0, |m| m + 1));
            for &t in taxa {
                bs.insert(t);
            }
            let names: Vec<&str> = bs
                .ones()
                .map(|t| labels.get(t - 1).map(String::as_str).unwrap_or(""))
                .collect();
            if names.iter().all(|n| !n.is_empty()) {
                Some(names.join(", "))
            } else {
                Some(join_members(&bs, ", "))
            }
        };
        if let Some(nd) = graph.base.graph.node_weight_mut(v) {
            nd.label = label;
        }
    }
}
