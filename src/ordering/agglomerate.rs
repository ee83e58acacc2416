use anyhow::{Context, Result};

use crate::ordering::net_node::{NetArena, HEAD};
use crate::progress::{self, Progress};

const EPS: f64 = 1e-12;

/// Repeatedly amalgamate the cluster pair minimising the neighbour-joining Q criterion
/// until three active nodes remain. Returns the amalgamation stack (the `u` of every 3-way join,
/// in creation order); the three surviving nodes are left in the active list.
pub(crate) fn join_nodes(arena: &mut NetArena, progress: Option<&dyn Progress>) -> Result<Vec<usize>> {
    let n_tax = arena.n_tax;
    let mut joins: Vec<usize> = Vec::new();

    let mut num_active = n_tax;
    let mut num_clusters = n_tax;

    while num_active > 3 {
        progress::check(progress)?;
        progress::report(progress, n_tax - num_active);

        if num_active == 4 && num_clusters == 2 {
            // Two pairs left; Q would divide by zero. Pick the cheaper of the two 3-way joins.
            let actives = arena.active();
            let p = outermost(arena, &actives).context("no active node left")?;
            let pn = arena.nodes[p].nbr.context("expected partner of p")?;
            let q = actives
                .iter()
                .copied()
                .find(|&a| a != p && a != pn)
                .context("expected a second pair")?;
            let qn = arena.nodes[q].nbr.context("expected partner of q")?;
            let lhs = arena.d(p, q) + arena.d(pn, qn);
            let rhs = arena.d(p, qn) + arena.d(pn, q);
            if lhs < rhs {
                join3way(arena, p, q, qn, &mut joins)?;
            } else {
                join3way(arena, p, qn, q, &mut joins)?;
            }
            num_active -= 1;
            num_clusters -= 1;
            continue;
        }

        compute_sx(arena);
        let (cx, cy) = select_cluster_pair(arena, num_clusters)?;
        let (x, y) = select_representatives(arena, cx, cy, num_clusters);

        match (arena.nodes[x].nbr, arena.nodes[y].nbr) {
            (None, None) => {
                join2way(arena, x, y);
                num_clusters -= 1;
            }
            (None, Some(yb)) => {
                join3way(arena, x, y, yb, &mut joins)?;
                num_active -= 1;
                num_clusters -= 1;
            }
            (Some(xb), None) => {
                join3way(arena, y, x, xb, &mut joins)?;
                num_active -= 1;
                num_clusters -= 1;
            }
            (Some(xb), Some(yb)) => {
                if four_way_flipped(arena, xb, x, y, yb) {
                    join4way(arena, yb, y, x, xb, &mut joins)?;
                } else {
                    join4way(arena, xb, x, y, yb, &mut joins)?;
                }
                num_active -= 2;
                num_clusters -= 1;
            }
        }
    }

    Ok(joins)
}

/// Sx: averaged distance from each cluster to every other cluster, shared by both members.
fn compute_sx(arena: &mut NetArena) {
    let actives = arena.active();
    for &p in &actives {
        arena.nodes[p].sx = 0.0;
    }

    for (i, &p) in actives.iter().enumerate() {
        // one representative per cluster: the member with the smaller id
        let eval_p = arena.nodes[p].nbr.map_or(true, |nb| arena.nodes[nb].id > arena.nodes[p].id);
        if !eval_p {
            continue;
        }
        for &q in &actives[i + 1..] {
            let eval_q = match arena.nodes[q].nbr {
                None => true,
                Some(nb) => arena.nodes[nb].id > arena.nodes[q].id && nb != p,
            };
            if !eval_q {
                continue;
            }
            let dpq = avg_cluster_dist(arena, p, q);
            arena.nodes[p].sx += dpq;
            if let Some(pb) = arena.nodes[p].nbr {
                arena.nodes[pb].sx += dpq;
            }
            arena.nodes[q].sx += dpq;
            if let Some(qb) = arena.nodes[q].nbr {
                arena.nodes[qb].sx += dpq;
            }
        }
    }
}

/// Cluster pair minimising `Q = (num_clusters - 2) D(p,q) - Sx(p) - Sx(q)`.
fn select_cluster_pair(arena: &NetArena, num_clusters: usize) -> Result<(usize, usize)> {
    let actives = arena.active();
    let mut best: Option<(usize, usize, f64)> = None;

    for (i, &p) in actives.iter().enumerate() {
        if arena.nodes[p].nbr.map_or(false, |nb| arena.nodes[nb].id < arena.nodes[p].id) {
            continue;
        }
        for &q in &actives[..i] {
            if arena.nodes[q].nbr.map_or(false, |nb| arena.nodes[nb].id < arena.nodes[q].id) {
                continue;
            }
            if arena.nodes[q].nbr == Some(p) {
                continue;
            }

            let dpq = avg_cluster_dist(arena, p, q);
            let qpq = (num_clusters as f64 - 2.0) * dpq - arena.nodes[p].sx - arena.nodes[q].sx;

            let replace = match best {
                None => true,
                Some((bx, by, bq)) => {
                    fuzzy_lt(qpq, bq) || (fuzzy_eq(qpq, bq) && pair_key(arena, p, q) < pair_key(arena, bx, by))
                }
            };
            if replace {
                best = Some((p, q, qpq));
            }
        }
    }

    best.map(|(p, q, _)| (p, q))
        .context("no cluster pair available for agglomeration")
}

/// Within the chosen clusters, pick the members to join using the Rx refinement.
fn select_representatives(arena: &mut NetArena, cx: usize, cy: usize, num_clusters: usize) -> (usize, usize) {
    let cxb = arena.nodes[cx].nbr;
    let cyb = arena.nodes[cy].nbr;

    if cxb.is_some() || cyb.is_some() {
        let mut members = vec![cx, cy];
        members.extend(cxb);
        members.extend(cyb);
        for z in members {
            arena.nodes[z].rx = compute_rx(arena, z, cx, cy);
        }
    }

    let mut m = num_clusters;
    if cxb.is_some() {
        m += 1;
    }
    if cyb.is_some() {
        m += 1;
    }
    let q = |a: usize, b: usize| {
        (m as f64 - 2.0) * arena.d(a, b) - arena.nodes[a].rx - arena.nodes[b].rx
    };

    let (mut x, mut y) = (cx, cy);
    let mut best_q = q(cx, cy);
    let mut candidates: Vec<(usize, usize)> = Vec::with_capacity(3);
    if let Some(b) = cxb {
        candidates.push((b, cy));
    }
    if let Some(b) = cyb {
        candidates.push((cx, b));
    }
    if let (Some(bx), Some(by)) = (cxb, cyb) {
        candidates.push((bx, by));
    }
    for (a, b) in candidates {
        let qv = q(a, b);
        if fuzzy_lt(qv, best_q) {
            best_q = qv;
            x = a;
            y = b;
        }
    }
    (x, y)
}

#[inline]
fn fuzzy_lt(a: f64, b: f64) -> bool {
    (a - b) < -EPS
}

#[inline]
fn fuzzy_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= EPS
}

/// Smaller pair of ids first, so ties resolve the same way whatever the list order.
#[inline]
fn pair_key(arena: &NetArena, a: usize, b: usize) -> (usize, usize) {
    let (ia, ib) = (arena.nodes[a].id, arena.nodes[b].id);
    if ia <= ib { (ia, ib) } else { (ib, ia) }
}

fn join2way(arena: &mut NetArena, x: usize, y: usize) {
    arena.nodes[x].nbr = Some(y);
    arena.nodes[y].nbr = Some(x);
}

/// Replace `x`, `y`, `z` (with `y`, `z` partners or `x`, `y` partners) by two new partners
/// `u = (x, y)` and `v = (y, z)`; pushes `u` onto `joins` and returns it.
fn join3way(arena: &mut NetArena, x: usize, y: usize, z: usize, joins: &mut Vec<usize>) -> Result<usize> {
    let u = arena.alloc()?;
    let v = arena.alloc()?;

    arena.nodes[u].ch1 = Some(x);
    arena.nodes[u].ch2 = Some(y);
    arena.nodes[v].ch1 = Some(y);
    arena.nodes[v].ch2 = Some(z);
    arena.nodes[u].nbr = Some(v);
    arena.nodes[v].nbr = Some(u);

    arena.replace(x, u);
    arena.replace(z, v);
    arena.unlink(y);

    let (xid, yid, zid) = (arena.nodes[x].id, arena.nodes[y].id, arena.nodes[z].id);
    let mut p_opt = arena.nodes[HEAD].next;
    while let Some(p) = p_opt {
        let pid = arena.nodes[p].id;
        let mat = &mut arena.mat;

        mat[u][pid] = (2.0 / 3.0) * mat[xid][pid] + (1.0 / 3.0) * mat[yid][pid];
        mat[pid][u] = mat[u][pid];

        mat[v][pid] = (2.0 / 3.0) * mat[zid][pid] + (1.0 / 3.0) * mat[yid][pid];
        mat[pid][v] = mat[v][pid];

        p_opt = arena.nodes[p].next;
    }
    arena.mat[u][u] = 0.0;
    arena.mat[v][v] = 0.0;

    joins.push(u);
    Ok(u)
}

/// The 4-way join is not symmetric in its two pairs. Lead with the pair of larger Sx,
/// falling back to the cross distances, so the outcome does not depend on list order.
fn four_way_flipped(arena: &NetArena, xb: usize, x: usize, y: usize, yb: usize) -> bool {
    let (sx, sy) = (arena.nodes[x].sx, arena.nodes[y].sx);
    if !fuzzy_eq(sx, sy) {
        return sx < sy;
    }
    fuzzy_lt(arena.d(xb, y), arena.d(x, yb))
}

/// Active node with the largest summed distance to the other actives; ties keep list order.
fn outermost(arena: &NetArena, actives: &[usize]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &a in actives {
        let total: f64 = actives.iter().map(|&b| arena.d(a, b)).sum();
        if best.map_or(true, |(_, t)| fuzzy_lt(t, total)) {
            best = Some((a, total));
        }
    }
    best.map(|(a, _)| a)
}

/// Two partnered pairs `(x2, x)` and `(y, y2)` become one pair via two 3-way joins.
fn join4way(
    arena: &mut NetArena,
    x2: usize,
    x: usize,
    y: usize,
    y2: usize,
    joins: &mut Vec<usize>,
) -> Result<()> {
    let u = join3way(arena, x2, x, y, joins)?;
    let v = arena.nodes[u].nbr.context("join produced no partner")?;
    join3way(arena, u, v, y2, joins)?;
    Ok(())
}

fn avg_cluster_dist(arena: &NetArena, p: usize, q: usize) -> f64 {
    match (arena.nodes[p].nbr, arena.nodes[q].nbr) {
        (None, None) => arena.d(p, q),
        (Some(pb), None) => 0.5 * (arena.d(p, q) + arena.d(pb, q)),
        (None, Some(qb)) => 0.5 * (arena.d(p, q) + arena.d(p, qb)),
        (Some(pb), Some(qb)) => {
            0.25 * (arena.d(p, q) + arena.d(p, qb) + arena.d(pb, q) + arena.d(pb, qb))
        }
    }
}

/// Rx: distance from `z` to every active node, halved for members of other pairs.
fn compute_rx(arena: &NetArena, z: usize, cx: usize, cy: usize) -> f64 {
    let mut rx = 0.0;
    let mut p_opt = arena.nodes[HEAD].next;
    while let Some(p) = p_opt {
        let full = p == cx
            || arena.nodes[cx].nbr == Some(p)
            || p == cy
            || arena.nodes[cy].nbr == Some(p)
            || arena.nodes[p].nbr.is_none();
        let term = arena.d(z, p);
        rx += if full { term } else { term / 2.0 };
        p_opt = arena.nodes[p].next;
    }
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn five() -> NetArena {
        NetArena::new(&arr2(&[
            [0.0, 5.0, 9.0, 9.0, 8.0],
            [5.0, 0.0, 10.0, 10.0, 9.0],
            [9.0, 10.0, 0.0, 8.0, 7.0],
            [9.0, 10.0, 8.0, 0.0, 3.0],
            [8.0, 9.0, 7.0, 3.0, 0.0],
        ]))
    }

    #[test]
    fn agglomeration_stops_at_three_actives() {
        let mut arena = five();
        let joins = join_nodes(&mut arena, None).unwrap();
        assert_eq!(arena.active().len(), 3);
        // n - 3 three-way joins
        assert_eq!(joins.len(), 2);
        for &u in &joins {
            let v = arena.nodes[u].nbr.unwrap();
            assert_eq!(arena.nodes[v].nbr, Some(u));
            assert_eq!(arena.nodes[u].ch2, arena.nodes[v].ch1);
        }
    }

    #[test]
    fn lowest_q_pair_is_selected() {
        let mut arena = five();
        compute_sx(&mut arena);
        let (p, q) = select_cluster_pair(&arena, 5).unwrap();
        let mut pair = [p, q];
        pair.sort_unstable();
        // Q(1,2) = 3*5 - 31 - 34 = -50 beats Q(4,5) = 3*3 - 30 - 27 = -48
        assert_eq!(pair, [1, 2]);
    }

    #[test]
    fn three_way_update_weights() {
        let mut arena = five();
        join2way(&mut arena, 4, 5);
        let mut joins = Vec::new();
        let u = join3way(&mut arena, 3, 4, 5, &mut joins).unwrap();
        let v = arena.nodes[u].nbr.unwrap();
        assert_eq!(arena.active(), vec![1, 2, u, v]);
        // d(u,1) = 2/3 d(3,1) + 1/3 d(4,1)
        assert!((arena.d(u, 1) - (2.0 / 3.0 * 9.0 + 1.0 / 3.0 * 9.0)).abs() < 1e-12);
        // d(v,2) = 2/3 d(5,2) + 1/3 d(4,2)
        assert!((arena.d(v, 2) - (2.0 / 3.0 * 9.0 + 1.0 / 3.0 * 10.0)).abs() < 1e-12);
    }

    #[test]
    fn cancellation_is_polled() {
        let mut arena = five();
        let flag = crate::progress::CancelFlag::new();
        flag.cancel();
        let err = join_nodes(&mut arena, Some(&flag)).unwrap_err();
        assert!(crate::error::is_cancelled(&err));
    }
}
