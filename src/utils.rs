use anyhow::{Result, bail};
use ndarray::Array2;
use rayon::prelude::*;

use crate::error::NetworkError;
use crate::splits::asplit::ASplit;

/// Relative tolerance used when checking distance-matrix symmetry.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Reject distance matrices that are not square, symmetric, finite, non-negative
/// and zero on the diagonal.
pub fn validate_distance_matrix(d: &Array2<f64>) -> Result<()> {
    let n = d.nrows();
    if n != d.ncols() {
        bail!(NetworkError::invalid(format!(
            "distance matrix must be square, got {}x{}",
            n,
            d.ncols()
        )));
    }
    for i in 0..n {
        if d[[i, i]].abs() > SYMMETRY_TOLERANCE {
            bail!(NetworkError::invalid(format!(
                "diagonal entry ({0},{0}) is {1}, expected 0",
                i + 1,
                d[[i, i]]
            )));
        }
        for j in (i + 1)..n {
            let (a, b) = (d[[i, j]], d[[j, i]]);
            if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 {
                bail!(NetworkError::invalid(format!(
                    "distance ({},{}) must be finite and non-negative, got {}",
                    i + 1,
                    j + 1,
                    if a.is_finite() && a >= 0.0 { b } else { a }
                )));
            }
            if (a - b).abs() > SYMMETRY_TOLERANCE * a.abs().max(b.abs()).max(1.0) {
                bail!(NetworkError::invalid(format!(
                    "distance matrix is not symmetric at ({},{}): {} vs {}",
                    i + 1,
                    j + 1,
                    a,
                    b
                )));
            }
        }
    }
    Ok(())
}

/// Path-length distances induced by `splits` on `n` taxa:
/// `S[i,j] = Σ weight(s)` over splits separating `i+1` and `j+1`.
pub fn split_distances(n: usize, splits: &[ASplit]) -> Array2<f64> {
    splits
        .par_iter()
        .map(|s| {
            let mut m = Array2::<f64>::zeros((n, n));
            let w = s.get_weight();
            for i1 in s.get_a().ones().filter(|&t| t != 0 && t <= n) {
                for j1 in s.get_b().ones().filter(|&t| t != 0 && t <= n) {
                    m[[i1 - 1, j1 - 1]] += w;
                    m[[j1 - 1, i1 - 1]] += w;
                }
            }
            m
        })
        .reduce(
            || Array2::<f64>::zeros((n, n)),
            |mut acc, m| {
                acc.zip_mut_with(&m, |a, b| *a += *b);
                acc
            },
        )
}

/// Least-squares fit (%) of the given splits to the distances:
/// `100 * (1 - Σ(s_ij - d_ij)^2 / Σ d_ij^2)` over `i < j`.
pub fn compute_least_squares_fit(distances: &Array2<f64>, splits: &[ASplit]) -> f32 {
    let n = distances.nrows();
    if n < 2 {
        return 0.0;
    }
    let split_dist = split_distances(n, splits);

    let (sum_diff_sq, sum_d_sq) = (0..n - 1)
        .into_par_iter()
        .map(|i| {
            let mut diff_sum = 0.0;
            let mut d_sum = 0.0;
            for j in (i + 1)..n {
                let dij = distances[[i, j]];
                let diff = split_dist[[i, j]] - dij;
                diff_sum += diff * diff;
                d_sum += dij * dij;
            }
            (diff_sum, d_sum)
        })
        .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));

    let fit = if sum_d_sq > 0.0 {
        100.0 * (1.0 - (sum_diff_sq / sum_d_sq))
    } else {
        0.0
    };
    fit as f32
}
