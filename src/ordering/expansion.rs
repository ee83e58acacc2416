use anyhow::{Context, Result, anyhow, ensure};

use crate::ordering::net_node::{NetArena, HEAD};
use crate::progress::{self, Progress};
use crate::weights::local_qp::fit_pendants;

/// Output of the expansion: `[0, t1..tn]` and per-taxon provisional pendant weights
/// (`pendant[0]` unused).
pub(crate) struct Expansion {
    pub cycle: Vec<usize>,
    pub pendant: Vec<f64>,
}

/// Replay the amalgamation stack to rebuild the circular order, estimating a pendant
/// weight for every node that re-enters the ring.
pub(crate) fn expand_nodes(
    arena: &mut NetArena,
    mut joins: Vec<usize>,
    progress: Option<&dyn Progress>,
) -> Result<Expansion> {
    let n_tax = arena.n_tax;
    ensure!(n_tax >= 3, "need at least 3 taxa");
    arena.rebuild_reduced_distances();
    let mut pendant = vec![0.0f64; arena.nodes.len()];

    // Close the three survivors into a ring.
    let x0 = arena.nodes[HEAD].next.context("need 3 active nodes")?;
    let y0 = arena.nodes[x0].next.context("need 3 active nodes")?;
    let z0 = arena.nodes[y0].next.context("need 3 active nodes")?;
    arena.nodes[z0].next = Some(x0);
    arena.nodes[x0].prev = Some(z0);

    let seed = fit_pendants(arena.d(x0, y0), arena.d(y0, z0), arena.d(x0, z0), 0, [0.0; 3]);
    pendant[x0] = seed[0];
    pendant[y0] = seed[1];
    pendant[z0] = seed[2];

    let mut anchor = x0;
    let total = joins.len();
    while let Some(mut u) = joins.pop() {
        progress::check(progress)?;
        progress::report(progress, total - joins.len());

        let mut v = arena.nodes[u].nbr.context("joined node without partner")?;
        let mut x = arena.nodes[u].ch1.context("joined node without first child")?;
        let y = arena.nodes[u].ch2.context("joined node without second child")?;
        let mut z = arena.nodes[v].ch2.context("partner without second child")?;

        if arena.nodes[u].next == Some(v) {
            // already oriented u -> v
        } else if arena.nodes[v].next == Some(u) {
            std::mem::swap(&mut u, &mut v);
            std::mem::swap(&mut x, &mut z);
        } else {
            return Err(anyhow!(
                "join expansion broken: {} and {} are not adjacent in the ring",
                u,
                v
            ));
        }

        let uprev = arena.nodes[u].prev.context("ring broken before u")?;
        let vnext = arena.nodes[v].next.context("ring broken after v")?;

        // uprev -> x -> y -> z -> vnext
        arena.nodes[x].prev = Some(uprev);
        arena.nodes[uprev].next = Some(x);
        arena.nodes[x].next = Some(y);
        arena.nodes[y].prev = Some(x);
        arena.nodes[y].next = Some(z);
        arena.nodes[z].prev = Some(y);
        arena.nodes[z].next = Some(vnext);
        arena.nodes[vnext].prev = Some(z);

        // Everything else on the ring keeps its estimate; the newcomers are fitted against it.
        let mut extra = [0.0f64; 3];
        let mut k = 0usize;
        let mut cur = vnext;
        while cur != x {
            for (slot, &a) in [x, y, z].iter().enumerate() {
                extra[slot] += arena.d(a, cur) - pendant[cur];
            }
            k += 1;
            cur = arena.nodes[cur].next.context("ring broken while fitting pendants")?;
        }
        let p = fit_pendants(arena.d(x, y), arena.d(y, z), arena.d(x, z), k, extra);
        pendant[x] = p[0];
        pendant[y] = p[1];
        pendant[z] = p[2];
        anchor = x;
    }

    let cycle = read_cycle(arena, anchor)?;
    let mut leaf_pendant = vec![0.0f64; n_tax + 1];
    leaf_pendant[1..].copy_from_slice(&pendant[1..=n_tax]);
    Ok(Expansion {
        cycle,
        pendant: leaf_pendant,
    })
}

/// Walk the ring from taxon 1 in the direction whose next leaf is smaller.
/// `anchor` is any node currently on the ring.
fn read_cycle(arena: &NetArena, anchor: usize) -> Result<Vec<usize>> {
    let n_tax = arena.n_tax;
    let start = {
        let mut cur = anchor;
        loop {
            if arena.nodes[cur].id == 1 {
                break cur;
            }
            cur = arena.nodes[cur].next.context("broken ring while seeking taxon 1")?;
            ensure!(cur != anchor, "taxon 1 not found in ring");
        }
    };

    let forward = next_leaf_in_dir(arena, start, true)? <= next_leaf_in_dir(arena, start, false)?;

    let mut cycle = Vec::with_capacity(n_tax + 1);
    cycle.push(0);
    let mut a = start;
    loop {
        if arena.is_leaf(a) {
            cycle.push(arena.nodes[a].id);
            if cycle.len() == n_tax + 1 {
                break;
            }
        }
        a = step(arena, a, forward)?;
        ensure!(a != start, "ring holds fewer than {} taxa", n_tax);
    }
    Ok(cycle)
}

fn step(arena: &NetArena, a: usize, forward: bool) -> Result<usize> {
    let next = if forward {
        arena.nodes[a].next
    } else {
        arena.nodes[a].prev
    };
    next.context("ring broken during extraction")
}

fn next_leaf_in_dir(arena: &NetArena, start: usize, forward: bool) -> Result<usize> {
    let mut a = start;
    loop {
        a = step(arena, a, forward)?;
        if arena.is_leaf(a) {
            return Ok(arena.nodes[a].id);
        }
        ensure!(a != start, "looped around without finding a leaf");
    }
}
