use anyhow::Result;
use clap::{Args, ValueEnum};
use fixedbitset::FixedBitSet;
use log::debug;
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;
use std::time::{Duration, Instant};

use crate::progress::{self, Progress};
use crate::splits::asplit::ASplit;

struct Scratch {
    p: Vec<f64>,
    r: Vec<f64>,
    z: Vec<f64>,
    w: Vec<f64>,
    /// Holds `W^½ r` before it goes through Aᵀ.
    t: Vec<f64>,
}

impl Scratch {
    fn new(len: usize) -> Self {
        Self {
            p: vec![0.0; len],
            r: vec![0.0; len],
            z: vec![0.0; len],
            w: vec![0.0; len],
            t: vec![0.0; len],
        }
    }
}

/// Which residuals the fit minimises.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[clap(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum LeastSquares {
    /// Σ (s_ij - d_ij)²
    #[default]
    Ordinary,
    /// Σ (s_ij - d_ij)² / d_ij², pairs at distance 0 weighted 1.
    Weighted,
}

#[derive(Args, Clone, Debug)]
pub struct NNLSParams {
    /// Include only split weights > cutoff (trivial splits always included).
    #[arg(long, default_value = "1e-6")]
    pub cutoff: f64,
    /// Stop if squared projected gradient < this (reset from ‖Aᵀ d‖ at runtime).
    #[arg(long, default_value = "1e-5")]
    pub proj_grad_bound: f64,
    /// Hard iteration cap (outer loops).
    #[arg(long, default_value_t = usize::MAX)]
    pub max_iterations: usize,
    /// Wall-clock cap in ms.
    #[arg(long, default_value_t = u64::MAX)]
    pub max_time_ms: u64,
    #[arg(long, default_value = "5000")]
    pub cgnr_iterations: usize,
    #[arg(long, default_value = "5e-6")]
    pub cgnr_tolerance: f64,
    /// Fraction of offending (negative) coords to push into the active set per correction.
    #[arg(long, default_value = "0.4")]
    pub active_set_rho: f64,
    #[arg(long, value_enum, default_value_t = LeastSquares::Ordinary)]
    pub least_squares: LeastSquares,
    /// Fit trivial splits only.
    #[arg(long, default_value_t = false)]
    pub star: bool,
}

impl Default for NNLSParams {
    fn default() -> Self {
        Self {
            cutoff: 1e-6,
            proj_grad_bound: 1e-5,
            max_iterations: usize::MAX,
            max_time_ms: u64::MAX,
            cgnr_iterations: 5000,
            cgnr_tolerance: 5e-6,
            active_set_rho: 0.4,
            least_squares: LeastSquares::Ordinary,
            star: false,
        }
    }
}

/// Flattened weights.
#[derive(Clone, Debug, PartialEq)]
pub struct SplitWeights {
    /// x[(i,j)] for 1 ≤ i < j ≤ n, flattened by blocks (1,2..n), (2,3..n), ...
    pub x: Vec<f64>,
}

/// Fitted circular splits as `ASplit`s.
///
/// - `cycle`: circular order (1-based with leading `0` sentinel)
/// - `distances`: symmetric `n×n` matrix in original taxon indices (0-based)
pub fn compute_asplits(
    cycle: &[usize],
    distances: &Array2<f64>,
    params: &mut NNLSParams,
    progress: Option<&dyn Progress>,
) -> Result<Vec<ASplit>> {
    let (_weights, pairs) = compute_use_1d(cycle, distances, params, progress)?;
    Ok(pairs_to_asplits(pairs, cycle.len() - 1))
}

pub(crate) fn pairs_to_asplits(pairs: Vec<(FixedBitSet, f64)>, n: usize) -> Vec<ASplit> {
    pairs
        .into_iter()
        .map(|(a, w)| ASplit::from_a_ntax_with_weight(a, n, w))
        .collect()
}

/// Core solver (vector form), also returns `(A_bitset, weight)` pairs.
pub fn compute_use_1d(
    cycle: &[usize],
    distances: &Array2<f64>,
    params: &mut NNLSParams,
    progress: Option<&dyn Progress>,
) -> Result<(SplitWeights, Vec<(FixedBitSet, f64)>)> {
    compute_use_1d_from(cycle, distances, params, progress, None)
}

/// As [`compute_use_1d`]; `warm_start` holds per-taxon trivial weights (`[0]` unused)
/// and seeds the star fit.
pub fn compute_use_1d_from(
    cycle: &[usize],
    distances: &Array2<f64>,
    params: &mut NNLSParams,
    progress: Option<&dyn Progress>,
    warm_start: Option<&[f64]>,
) -> Result<(SplitWeights, Vec<(FixedBitSet, f64)>)> {
    let n = cycle.len() - 1;
    if n <= 1 {
        return Ok((SplitWeights { x: vec![] }, vec![]));
    }
    if n == 2 {
        let d_12 = distances[[cycle[1] - 1, cycle[2] - 1]].max(0.0);
        let mut a = FixedBitSet::with_capacity(n + 1);
        a.insert(cycle[1]);
        return Ok((SplitWeights { x: vec![d_12] }, vec![(a, d_12)]));
    }

    // d[(i,j)], 1<=i<j<=n, in cycle order.
    let npairs = n * (n - 1) / 2;
    let mut d = vec![0.0; npairs];
    {
        let mut idx = 0usize;
        for i in 1..=n {
            for j in (i + 1)..=n {
                d[idx] = distances[[cycle[i] - 1, cycle[j] - 1]];
                idx += 1;
            }
        }
    }

    let sqrt_w = match params.least_squares {
        LeastSquares::Ordinary => None,
        LeastSquares::Weighted => Some(
            d.iter()
                .map(|&dij| if dij > 0.0 { 1.0 / dij } else { 1.0 })
                .collect::<Vec<f64>>(),
        ),
    };
    let op = Operator {
        n,
        sqrt_w: sqrt_w.as_deref(),
    };
    // weighted target W^½ d
    let target: Vec<f64> = match op.sqrt_w {
        Some(sw) => d.iter().zip(sw).map(|(di, si)| di * si).collect(),
        None => d.clone(),
    };

    let mut scratch = Scratch::new(npairs);
    let mut b_t_d = vec![0.0; npairs];
    op.apply_t(&target, &mut b_t_d, &mut scratch.t);
    let norm_btd = sum_array_squared(&b_t_d, n).sqrt();
    params.proj_grad_bound = (1e-4 * norm_btd).powi(2);

    // A is square and invertible, so A⁻¹ d is the unconstrained optimum for any weighting.
    let mut x = vec![0.0; npairs];
    calc_ainv_y(&d, &mut x, n);

    let pinned = params.star.then(|| {
        let trivial = trivial_pair_mask(n);
        trivial.iter().map(|&t| !t).collect::<Vec<bool>>()
    });

    if let Some(pinned) = &pinned {
        for (i, xi) in x.iter_mut().enumerate() {
            if pinned[i] {
                *xi = 0.0;
            }
        }
        if let Some(ws) = warm_start {
            for (i, t) in trivial_pairs(n) {
                x[i] = ws.get(cycle[t]).copied().unwrap_or(0.0);
            }
            debug!("Seeding star fit from provisional pendant weights");
        }
    }

    let min_val = x.iter().copied().fold(f64::INFINITY, f64::min);
    if min_val < 0.0 || pinned.is_some() {
        let start = Instant::now();
        zero_negative_entries(&mut x);
        let mut active = vec![false; npairs];
        get_active_entries(&x, &mut active);
        if let Some(pinned) = &pinned {
            for (a, &p) in active.iter_mut().zip(pinned) {
                *a |= p;
            }
        }

        let mut splits_idx = vec![0usize; npairs];
        let mut order_idx: Vec<usize> = (0..npairs).collect();
        let mut vals = vec![0.0; npairs];

        active_set_method(
            &mut x,
            &target,
            &op,
            params,
            &mut active,
            pinned.as_deref(),
            &mut scratch,
            &mut splits_idx,
            &mut order_idx,
            &mut vals,
            progress,
            start,
        )?;
    }

    // (bitset A, weight) for every kept split
    let mut out_pairs = Vec::new();
    let mut idx = 0usize;
    for i in 1..=n {
        let mut a = FixedBitSet::with_capacity(n + 1);
        for j in (i + 1)..=n {
            a.insert(cycle[j - 1]);
            let w = x[idx].max(0.0);

            // trivial: |A| == 1 or n-1
            let size_a = j - i;
            if w > params.cutoff || size_a == 1 || size_a == n - 1 {
                out_pairs.push((a.clone(), w));
            }
            idx += 1;
        }
    }

    Ok((SplitWeights { x }, out_pairs))
}

/// Packed indices of the trivial splits with the cycle position of the isolated taxon:
/// `{cycle[i]}` is pair `(i, i+1)` and `{cycle[n]}` is the complement of pair `(1, n)`.
fn trivial_pairs(n: usize) -> impl Iterator<Item = (usize, usize)> {
    (1..n)
        .map(move |i| (pair_idx(i, i + 1, n), i))
        .chain(std::iter::once((pair_idx(1, n, n), n)))
}

fn trivial_pair_mask(n: usize) -> Vec<bool> {
    let mut mask = vec![false; n * (n - 1) / 2];
    for (i, _) in trivial_pairs(n) {
        mask[i] = true;
    }
    mask
}

/// `B = W^½ A` on packed pair vectors.
struct Operator<'a> {
    n: usize,
    sqrt_w: Option<&'a [f64]>,
}

impl Operator<'_> {
    /// y = B x
    fn apply(&self, x: &[f64], y: &mut [f64]) {
        calc_ax(x, y, self.n);
        if let Some(sw) = self.sqrt_w {
            y.par_iter_mut().zip(sw.par_iter()).for_each(|(yi, &si)| *yi *= si);
        }
    }

    /// y = Bᵀ r, using `tmp` for the weighted residual.
    fn apply_t(&self, r: &[f64], y: &mut [f64], tmp: &mut [f64]) {
        match self.sqrt_w {
            Some(sw) => {
                tmp.par_iter_mut()
                    .zip(r.par_iter().zip(sw.par_iter()))
                    .for_each(|(ti, (&ri, &si))| *ti = ri * si);
                calc_atx(tmp, y, self.n);
            }
            None => calc_atx(r, y, self.n),
        }
    }
}

/* ===================== Active-Set + CGNR ===================== */

#[allow(clippy::too_many_arguments)]
fn active_set_method(
    x: &mut [f64], // feasible (x >= 0)
    d: &[f64],
    op: &Operator,
    params: &mut NNLSParams,
    active: &mut [bool],
    pinned: Option<&[bool]>,
    scratch: &mut Scratch,
    tmp_splits: &mut [usize],
    idx_sorted: &mut [usize],
    vals: &mut [f64],
    progress: Option<&dyn Progress>,
    started: Instant,
) -> Result<()> {
    let npairs = x.len();
    let n = op.n;
    let mut xstar = vec![0.0; npairs];
    let mut k_outer = 0usize;

    loop {
        progress::check(progress)?;
        loop {
            xstar.copy_from_slice(x);

            let iters = cgnr(&mut xstar, d, active, op, params, scratch, progress, started)?;
            k_outer += 1;

            let ok = feasible_move_active_set(
                x,
                &xstar,
                active,
                tmp_splits,
                idx_sorted,
                vals,
                params.active_set_rho,
            );

            if ok && iters < params.cgnr_iterations {
                break;
            }
            if k_outer > params.max_iterations
                || started.elapsed() >= Duration::from_millis(params.max_time_ms)
            {
                return Ok(());
            }
        }

        x.copy_from_slice(&xstar);
        let Scratch { p, r, t, .. } = scratch;
        eval_gradient(x, d, p, r, t, op); // p := grad

        // project gradient
        p.par_iter_mut().zip(x.par_iter()).for_each(|(gi, &xi)| {
            if xi == 0.0 {
                *gi = gi.min(0.0)
            }
        });
        if let Some(pinned) = pinned {
            p.iter_mut().zip(pinned).for_each(|(gi, &fixed)| {
                if fixed {
                    *gi = 0.0
                }
            });
        }

        let pg = sum_array_squared(p, n);
        if pg < params.proj_grad_bound {
            return Ok(());
        }

        // release the worst active constraint
        let mut imin = 0usize;
        let mut pmin = 0.0f64;
        for i in 0..npairs {
            let fixed = pinned.is_some_and(|pn| pn[i]);
            if active[i] && !fixed && p[i] < pmin {
                pmin = p[i];
                imin = i;
            }
        }
        if pmin < 0.0 {
            active[imin] = false;
        } else {
            return Ok(());
        }
    }
}

/// Move x → x* feasibly. If x* has negatives, move to first boundary and mark a ρ-fraction active.
fn feasible_move_active_set(
    x: &mut [f64],
    xstar: &[f64],
    active: &mut [bool],
    splits: &mut [usize],
    indices: &mut [usize],
    vals: &mut [f64],
    rho: f64,
) -> bool {
    let mut count = 0usize;
    for i in 0..x.len() {
        if xstar[i] < 0.0 {
            // t_i = x_i / (x_i - x*_i)
            vals[count] = x[i] / (x[i] - xstar[i]);
            splits[count] = i;
            indices[count] = count;
            count += 1;
        }
    }
    if count == 0 {
        x.copy_from_slice(xstar);
        return true;
    }

    indices[..count].sort_by(|&a, &b| vals[a].total_cmp(&vals[b]));
    let tmin = vals[indices[0]];
    let num_to_make_active = usize::max(1, ((count as f64) * rho).ceil() as usize);
    for k in 0..num_to_make_active.min(count) {
        active[splits[indices[k]]] = true;
    }

    // x := (1 - tmin) x + tmin x*, clamped on active coords
    x.par_iter_mut()
        .zip(xstar.par_iter())
        .zip(active.par_iter())
        .for_each(|((xi, &xsi), &a)| {
            if a {
                *xi = 0.0
            } else {
                *xi = (1.0 - tmin) * *xi + tmin * xsi
            }
        });

    false
}

/* ===================== Linear ops A and Aᵀ (vector form) ===================== */

fn calc_ax(x: &[f64], y: &mut [f64], n: usize) {
    debug_assert_eq!(y.len(), x.len());

    // y(i,i+1)
    for i in 1..=(n - 1) {
        let mut s = 0.0;
        for j in (i + 2)..=n {
            s += x[pair_idx(i + 1, j, n)];
        }
        for j in 1..=i {
            s += x[pair_idx(j, i + 1, n)];
        }
        y[pair_idx(i, i + 1, n)] = s;
    }

    // y(i,i+2)
    for i in 1..=(n - 2) {
        let a = y[pair_idx(i, i + 1, n)];
        let b = y[pair_idx(i + 1, i + 2, n)];
        let c = x[pair_idx(i + 1, i + 2, n)];
        y[pair_idx(i, i + 2, n)] = a + b - 2.0 * c;
    }

    // general recurrence
    for k in 3..=(n - 1) {
        for i in 1..=(n - k) {
            let j = i + k;
            let y_ijm1 = y[pair_idx(i, j - 1, n)];
            let y_ip1j = y[pair_idx(i + 1, j, n)];
            let y_ip1jm1 = y[pair_idx(i + 1, j - 1, n)];
            let x_ip1j = x[pair_idx(i + 1, j, n)];
            y[pair_idx(i, j, n)] = y_ijm1 + y_ip1j - y_ip1jm1 - 2.0 * x_ip1j;
        }
    }
}

fn calc_atx(x: &[f64], y: &mut [f64], n: usize) {
    debug_assert_eq!(x.len(), n * (n - 1) / 2);

    // pass 1
    let mut s_index = 0usize;
    for i in 1..n {
        let mut d_index: isize = (i as isize) - 2;
        let mut y_s = 0.0;
        for j in 1..i {
            y_s += x[d_index as usize];
            d_index += (n - j) as isize - 1;
        }
        d_index = s_index as isize;
        for _j in (i + 1)..=n {
            y_s += x[d_index as usize];
            d_index += 1;
        }
        y[s_index] = y_s;
        s_index += n - i;
    }

    // pass 2
    s_index = 1;
    for i in 1..=(n - 2) {
        y[s_index] = y[s_index - 1] + y[s_index + n - i - 1] - 2.0 * x[s_index - 1];
        s_index += n - i;
    }

    // pass 3
    for k in 3..=(n - 1) {
        s_index = k - 1;
        for i in 1..=(n - k) {
            y[s_index] = y[s_index - 1] + y[s_index + n - i - 1]
                - y[s_index + n - i - 2]
                - 2.0 * x[s_index - 1];
            s_index += n - i;
        }
    }
}

/// Unconstrained solution `x = A⁻¹ y` on packed upper-triangle vectors of length n(n-1)/2.
pub fn calc_ainv_y(y: &[f64], x: &mut [f64], n: usize) {
    debug_assert!(n >= 3);
    debug_assert_eq!(y.len(), n * (n - 1) / 2);
    debug_assert_eq!(x.len(), y.len());

    // first row: x(1,2) = (y(1,n) + y(1,2) - y(2,n)) / 2
    x[0] = (y[n - 2] + y[0] - y[2 * n - 4]) / 2.0;

    let mut d_index = 2 * n - 4;
    for j in 3..=n {
        x[j - 2] = (y[d_index] + y[j - 2] - y[j - 3] - y[d_index + n - j]) / 2.0;
        d_index += n - j;
    }

    x[n - 2] = (y[n - 2] + y[y.len() - 1] - y[n - 3]) / 2.0;

    // rows i = 2..n-1 start at (2n - i)(i - 1)/2; offsets reach back one block (n - i + 1)
    for i in 2..=(n - 1) {
        let mut s = (2 * n - i) * (i - 1) / 2;
        let back = n - i + 1;

        x[s] = (y[s - back] + y[s] - y[s - back + 1]) / 2.0;
        s += 1;

        for _j in (i + 2)..=n {
            x[s] = (y[s - back] + y[s] - y[s - 1] - y[s - back + 1]) / 2.0;
            s += 1;
        }
    }
}

/* ===================== Gradient & CGNR ===================== */

/// gradient = Bᵀ (B x - d)
fn eval_gradient(x: &[f64], d: &[f64], gradient: &mut [f64], residual: &mut [f64], tmp: &mut [f64], op: &Operator) {
    op.apply(x, residual);
    residual
        .par_iter_mut()
        .zip(d.par_iter())
        .for_each(|(ri, &di)| *ri -= di);
    op.apply_t(residual, gradient, tmp);
}

fn get_active_entries(x: &[f64], a: &mut [bool]) {
    a.par_iter_mut()
        .zip(x.par_iter())
        .for_each(|(ai, &xi)| *ai = xi <= 0.0);
}

fn zero_negative_entries(x: &mut [f64]) {
    x.par_iter_mut().for_each(|xi| {
        if *xi < 0.0 {
            *xi = 0.0
        }
    });
}

/// Sum of squares over a packed upper-triangular vector, accumulated row by row.
pub fn sum_array_squared(x: &[f64], n: usize) -> f64 {
    debug_assert_eq!(x.len(), n * (n - 1) / 2);

    let mut total = 0.0f64;
    let mut index = 0usize;
    for i in 1..=n {
        let mut s_i = 0.0f64;
        for _j in (i + 1)..=n {
            let x_ij = x[index];
            s_i += x_ij * x_ij;
            index += 1;
        }
        total += s_i;
    }
    total
}

#[allow(clippy::too_many_arguments)]
fn cgnr(
    x: &mut [f64],
    d: &[f64],
    active_set: &[bool],
    op: &Operator,
    params: &NNLSParams,
    scratch: &mut Scratch,
    progress: Option<&dyn Progress>,
    started: Instant,
) -> Result<usize> {
    let n = op.n;
    let Scratch { p, r, z, w, t } = scratch;

    zero_negative_entries(x);

    // r = d - B x
    op.apply(x, r);
    r.par_iter_mut()
        .zip(d.par_iter())
        .for_each(|(ri, &di)| *ri = di - *ri);

    // z = Bᵀ r; mask actives
    op.apply_t(r, z, t);
    mask_active(z, active_set);
    p.copy_from_slice(z);

    let mut ztz = sum_array_squared(z, n);
    let mut k = 0usize;

    while k < params.cgnr_iterations && ztz >= params.cgnr_tolerance {
        // w = B p
        op.apply(p, w);
        let denom = sum_array_squared(w, n).max(1e-30);
        let alpha = ztz / denom;

        x.par_iter_mut()
            .zip(p.par_iter())
            .for_each(|(xi, &pi)| *xi += alpha * pi);
        r.par_iter_mut()
            .zip(w.par_iter())
            .for_each(|(ri, &wi)| *ri -= alpha * wi);

        op.apply_t(r, z, t);
        mask_active(z, active_set);

        let ztz_new = sum_array_squared(z, n);
        if ztz_new < params.cgnr_tolerance {
            k += 1;
            break;
        }
        let beta = ztz_new / ztz;

        p.par_iter_mut()
            .zip(z.par_iter())
            .for_each(|(pi, &zi)| *pi = zi + beta * *pi);

        ztz = ztz_new;
        k += 1;

        if k % n == 0 {
            progress::check(progress)?;
        }
        if started.elapsed() >= Duration::from_millis(params.max_time_ms) {
            break;
        }
    }
    Ok(k)
}

fn mask_active(z: &mut [f64], active_set: &[bool]) {
    z.par_iter_mut()
        .zip(active_set.par_iter())
        .for_each(|(zi, &a)| {
            if a {
                *zi = 0.0
            }
        });
}

/* ===================== Indexing ===================== */

#[inline]
fn pair_idx(i: usize, j: usize, n: usize) -> usize {
    // blocks: (1,2..n), (2,3..n), ...
    debug_assert!(1 <= i && i < j && j <= n);
    let offset = (i - 1) * n - (i - 1) * i / 2;
    offset + (j - i - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_cancelled;
    use crate::progress::CancelFlag;
    use ndarray::{arr2, Array2};

    fn build_pairs_from_fn(n: usize, f: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        let mut x = vec![0.0; n * (n - 1) / 2];
        let mut idx = 0usize;
        for i in 1..=n {
            for j in (i + 1)..=n {
                x[idx] = f(i, j);
                idx += 1;
            }
        }
        x
    }

    fn ax_to_distances(n: usize, pairs: &[f64]) -> Array2<f64> {
        let mut y = vec![0.0; pairs.len()];
        calc_ax(pairs, &mut y, n);
        let mut d = Array2::<f64>::zeros((n, n));
        for i in 1..=n {
            for j in (i + 1)..=n {
                let v = y[pair_idx(i, j, n)];
                d[[i - 1, j - 1]] = v;
                d[[j - 1, i - 1]] = v;
            }
        }
        d
    }

    fn star_metric(pendants: &[f64]) -> Array2<f64> {
        let n = pendants.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                0.0
            } else {
                pendants[i] + pendants[j]
            }
        })
    }

    fn smoke_10_matrix() -> Array2<f64> {
        arr2(&[
            [0.0,5.0,12.0,7.0,3.0,9.0,11.0,6.0,4.0,10.0],
            [5.0,0.0,8.0,2.0,14.0,5.0,13.0,7.0,12.0,1.0],
            [12.0,8.0,0.0,4.0,9.0,3.0,8.0,2.0,5.0,6.0],
            [7.0,2.0,4.0,0.0,11.0,7.0,10.0,4.0,6.0,9.0],
            [3.0,14.0,9.0,11.0,0.0,8.0,1.0,13.0,2.0,7.0],
            [9.0,5.0,3.0,7.0,8.0,0.0,12.0,5.0,3.0,4.0],
            [11.0,13.0,8.0,10.0,1.0,12.0,0.0,6.0,2.0,8.0],
            [6.0,7.0,2.0,4.0,13.0,5.0,6.0,0.0,9.0,7.0],
            [4.0,12.0,5.0,6.0,2.0,3.0,2.0,9.0,0.0,5.0],
            [10.0,1.0,6.0,9.0,7.0,4.0,8.0,7.0,5.0,0.0],
        ])
    }

    fn smoke_5_matrix() -> Array2<f64> {
        arr2(&[
            [0.0, 5.0, 9.0, 9.0, 8.0],
            [5.0, 0.0, 10.0, 10.0, 9.0],
            [9.0, 10.0, 0.0, 8.0, 7.0],
            [9.0, 10.0, 8.0, 0.0, 3.0],
            [8.0, 9.0, 7.0, 3.0, 0.0],
        ])
    }

    #[test]
    fn reconstruct_uniform_weights_n5() {
        let n = 5;
        let cycle: Vec<usize> = (0..=n).collect();
        let x_true = build_pairs_from_fn(n, |_i, _j| 1.0);
        let distances = ax_to_distances(n, &x_true);

        for least_squares in [LeastSquares::Ordinary, LeastSquares::Weighted] {
            let mut params = NNLSParams {
                least_squares,
                ..Default::default()
            };
            let (_w, asplits) = compute_use_1d(&cycle, &distances, &mut params, None).unwrap();
            assert_eq!(asplits.len(), n * (n - 1) / 2);

            // identity cycle: A = {i, ..., j-1}
            let mut x_est = vec![0.0; x_true.len()];
            for (a, w) in asplits {
                let i = a.ones().filter(|&t| t != 0).min().unwrap();
                let size = a.ones().filter(|&t| t != 0).count();
                x_est[pair_idx(i, i + size, n)] = w;
            }
            for (et, tt) in x_est.iter().zip(x_true.iter()) {
                assert!((*et - *tt).abs() < 1e-8, "{least_squares:?}: got {et}, wanted {tt}");
            }
        }
    }

    #[test]
    fn optimality_check_pg_small() {
        let n = 6;
        let cycle: Vec<usize> = (0..=n).collect();
        let x_true = build_pairs_from_fn(n, |i, j| (i + j) as f64 * 0.1);
        let distances = ax_to_distances(n, &x_true);

        let mut params = NNLSParams::default();
        let (weights, _splits) = compute_use_1d(&cycle, &distances, &mut params, None).unwrap();

        let npairs = n * (n - 1) / 2;
        let mut grad = vec![0.0; npairs];
        let mut resid = vec![0.0; npairs];
        let mut tmp = vec![0.0; npairs];
        let op = Operator { n, sqrt_w: None };
        eval_gradient(
            &weights.x,
            &y_pairs_from_matrix(&cycle, &distances),
            &mut grad,
            &mut resid,
            &mut tmp,
            &op,
        );
        grad.iter_mut().zip(weights.x.iter()).for_each(|(g, &xi)| {
            if xi == 0.0 {
                *g = g.min(0.0)
            }
        });

        let pg = sum_array_squared(&grad, n);
        assert!(pg < params.proj_grad_bound * 10.0);
    }

    #[test]
    fn weighted_fit_is_stationary_for_weighted_objective() {
        let n = 10;
        let cycle = vec![0, 1, 5, 7, 9, 3, 8, 4, 2, 10, 6];
        let distances = smoke_10_matrix();
        let mut params = NNLSParams {
            least_squares: LeastSquares::Weighted,
            ..Default::default()
        };
        let (weights, pairs) = compute_use_1d(&cycle, &distances, &mut params, None).unwrap();
        assert!(pairs.iter().all(|(_, w)| *w >= 0.0));

        let d = y_pairs_from_matrix(&cycle, &distances);
        let sw: Vec<f64> = d.iter().map(|&v| 1.0 / v).collect();
        let target: Vec<f64> = d.iter().zip(&sw).map(|(a, b)| a * b).collect();
        let op = Operator { n, sqrt_w: Some(&sw) };
        let npairs = d.len();
        let (mut grad, mut resid, mut tmp) = (vec![0.0; npairs], vec![0.0; npairs], vec![0.0; npairs]);
        eval_gradient(&weights.x, &target, &mut grad, &mut resid, &mut tmp, &op);
        grad.iter_mut().zip(weights.x.iter()).for_each(|(g, &xi)| {
            if xi == 0.0 {
                *g = g.min(0.0)
            }
        });
        assert!(sum_array_squared(&grad, n) < params.proj_grad_bound * 10.0);
    }

    fn y_pairs_from_matrix(cycle: &[usize], distances: &Array2<f64>) -> Vec<f64> {
        let n = cycle.len() - 1;
        let mut d = vec![0.0; n * (n - 1) / 2];
        let mut idx = 0usize;
        for i in 1..=n {
            for j in (i + 1)..=n {
                d[idx] = distances[[cycle[i] - 1, cycle[j] - 1]];
                idx += 1;
            }
        }
        d
    }

    #[test]
    fn test_calc_atx_smoke_10_1() {
        let n = 10;
        let n_pairs = n * (n - 1) / 2;
        let mut atx = vec![0.0; n_pairs];
        let cycle = vec![0, 1, 5, 7, 9, 3, 8, 4, 2, 10, 6];
        let distances = smoke_10_matrix();

        let d = y_pairs_from_matrix(&cycle, &distances);
        calc_atx(&d, &mut atx, n);

        let exp = vec![
            67.0, 129.0, 176.0, 208.0, 197.0, 184.0, 160.0, 105.0,
            56.0, 68.0, 137.0, 177.0, 190.0, 189.0, 179.0, 134.0,
            105.0, 71.0, 115.0, 146.0, 171.0, 183.0, 166.0, 151.0,
            48.0, 95.0, 132.0, 164.0, 173.0, 174.0, 57.0, 112.0,
            156.0, 189.0, 200.0, 59.0, 111.0, 160.0, 183.0, 60.0,
            123.0, 160.0, 67.0, 122.0, 57.0,
        ];
        compare_float_array(&atx, &exp, 1e-8);
        let norm_atx = sum_array_squared(&atx, n).sqrt();
        assert_eq!(norm_atx, 959.9874999186187);
        let mut params = NNLSParams::default();
        params.proj_grad_bound = (1e-4 * norm_atx).powi(2);

        let mut x_exp = vec![2.0, 2.0, 1.0, 4.0, -4.0, -0.5, 0.0, 3.0, 1.5, -3.5, 4.0, -0.5, 5.0, -1.5, 2.5, -6.0, 1.0, 0.5, -0.5, -3.0, 3.0, 0.0, 1.0, 1.5, -0.5, 3.0, -3.5, 1.5, -1.0, -3.0, -1.0, 2.5, -1.0, 2.5, -0.5, 1.0, -0.5, 1.0, 0.5, -0.5, 3.5, 0.0, -3.0, 3.0, 0.0];

        let mut x = vec![0.0; n_pairs];
        calc_ainv_y(&d, &mut x, n);
        let min_val = x.iter().copied().fold(f64::INFINITY, f64::min);
        assert_eq!(min_val, -6.0);
        compare_float_array(&x, &x_exp, 1e-8);

        zero_negative_entries(&mut x);
        let mut active = vec![false; n_pairs];
        get_active_entries(&x, &mut active);

        let mut scratch = Scratch::new(n_pairs);
        let mut splits_idx = vec![0usize; n_pairs];
        let mut order_idx: Vec<usize> = (0..n_pairs).collect();
        let mut vals = vec![0.0; n_pairs];
        let op = Operator { n, sqrt_w: None };

        active_set_method(
            &mut x,
            &d,
            &op,
            &mut params,
            &mut active,
            None,
            &mut scratch,
            &mut splits_idx,
            &mut order_idx,
            &mut vals,
            None,
            Instant::now(),
        )
        .expect("active set method failed");

        x_exp = vec![1.3724245430681956, 1.3454752556293355, 0.0, 2.012589097140714, 0.0, 0.0, 0.432648565932274, 0.0, 1.2912946058459376, 0.0, 1.7933838153171087, 0.7711228988729982, 1.0043842023776657, 0.0, 0.0, 0.0, 0.0, 0.8997353824936709, 0.0, 0.0, 0.0, 0.6914161425268539, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.24973217871606335, 0.9249564751107247, 0.5594817784033412, 0.6432103250072205, 0.0, 0.7511706061796792, 0.0, 0.0, 0.0, 0.06892851867483342, 1.9992119883544948, 0.0, 0.0, 1.889915657808208, 0.0];
        compare_float_array(&x, &x_exp, 1e-8);
    }

    #[test]
    fn smoke_5_1() {
        let ord = vec![0, 1, 2, 5, 4, 3];
        let mut params = NNLSParams::default();
        let (_unused, pairs) =
            compute_use_1d(&ord, &smoke_5_matrix(), &mut params, None).expect("NNLS solve");

        assert_eq!(pairs.len(), 7);
        let weights = pairs.iter().map(|(_, w)| *w).collect::<Vec<f64>>();
        compare_float_array(&weights, &[2.0, 3.0, 4.0, 3.0, 1.0, 2.0, 2.0], 1e-8);
    }

    #[test]
    fn smoke_10_1() {
        let ord = vec![0, 1, 5, 7, 9, 3, 8, 4, 2, 10, 6];
        let mut params = NNLSParams::default();
        let (_unused, pairs) =
            compute_use_1d(&ord, &smoke_10_matrix(), &mut params, None).expect("NNLS solve");

        assert_eq!(pairs.len(), 22);
        let weights = pairs.iter().map(|(_, w)| *w).collect::<Vec<f64>>();
        let expected_weights = vec![
            1.3724245430681956, 1.3454752556293355, 2.012589097140714, 0.432648565932274,
            1.2912946058459376, 0.0, 1.7933838153171087, 0.7711228988729982, 1.0043842023776657,
            0.8997353824936709, 0.6914161425268539, 0.0, 0.24973217871606335, 0.9249564751107247,
            0.5594817784033412, 0.6432103250072205, 0.7511706061796792, 0.06892851867483342,
            1.9992119883544948, 0.0, 1.889915657808208, 0.0,
        ];
        compare_float_array(&weights, &expected_weights, 1e-8);
    }

    #[test]
    fn two_taxa_keeps_the_single_trivial_split() {
        let d = arr2(&[[0.0, 0.0], [0.0, 0.0]]);
        let mut params = NNLSParams::default();
        let (_w, pairs) = compute_use_1d(&[0, 1, 2], &d, &mut params, None).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!(pairs[0].0.contains(1));
        assert_eq!(pairs[0].1, 0.0);
    }

    #[test]
    fn star_fit_recovers_pendant_lengths() {
        let cycle: Vec<usize> = (0..=5).collect();
        let d = star_metric(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut params = NNLSParams {
            star: true,
            ..Default::default()
        };
        let (_w, pairs) = compute_use_1d(&cycle, &d, &mut params, None).unwrap();
        // pairs (1,2) (1,5) (2,3) (3,4) (4,5)
        assert_eq!(pairs.len(), 5);
        let weights: Vec<f64> = pairs.iter().map(|(_, w)| *w).collect();
        compare_float_array(&weights, &[1.0, 5.0, 2.0, 3.0, 4.0], 1e-8);
    }

    #[test]
    fn star_fit_ignores_nontrivial_structure() {
        let mut params = NNLSParams {
            star: true,
            ..Default::default()
        };
        let (w, pairs) =
            compute_use_1d(&[0, 1, 2, 5, 4, 3], &smoke_5_matrix(), &mut params, None).unwrap();
        assert_eq!(pairs.len(), 5);
        let trivial = trivial_pair_mask(5);
        for (xi, t) in w.x.iter().zip(trivial) {
            if !t {
                assert_eq!(*xi, 0.0);
            } else {
                assert!(*xi >= 0.0);
            }
        }
    }

    #[test]
    fn star_fit_converges_from_any_warm_start() {
        let cycle: Vec<usize> = (0..=5).collect();
        let d = star_metric(&[1.5, 0.5, 2.0, 1.0, 3.0]);
        let run = |warm: Option<&[f64]>| {
            let mut params = NNLSParams {
                star: true,
                ..Default::default()
            };
            compute_use_1d_from(&cycle, &d, &mut params, None, warm).unwrap().0.x
        };
        let cold = run(None);
        let warm = run(Some(&[0.0, 9.0, 9.0, 9.0, 9.0, 9.0]));
        compare_float_array(&cold, &warm, 1e-6);
    }

    #[test]
    fn cancelled_solve_returns_error() {
        let flag = CancelFlag::default();
        flag.cancel();
        let mut params = NNLSParams::default();
        let err = compute_use_1d(
            &[0, 1, 5, 7, 9, 3, 8, 4, 2, 10, 6],
            &smoke_10_matrix(),
            &mut params,
            Some(&flag),
        )
        .unwrap_err();
        assert!(is_cancelled(&err));
    }

    fn compare_float_array(arr1: &[f64], arr2: &[f64], eps: f64) {
        assert_eq!(arr1.len(), arr2.len());
        for (a, b) in arr1.iter().zip(arr2.iter()) {
            assert!((*a - *b).abs() < eps, "got {}, wanted {}", a, b);
        }
    }
}
