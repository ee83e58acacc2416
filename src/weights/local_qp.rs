const TOL: f64 = 1e-12;
const MAX_ROUNDS: usize = 16;

/// Minimise `½ xᵀ M x - bᵀ x` subject to `x >= 0` for a symmetric positive definite `M`.
///
/// Starts from the unconstrained optimum. While the iterate is infeasible the most violated
/// bound enters the active set; once feasible, the active bound with the most negative
/// multiplier leaves. Returns `None` when the loop does not settle within a fixed number of
/// rounds or a reduced system is singular.
pub fn solve_nonnegative_qp3(m: &[[f64; 3]; 3], b: &[f64; 3]) -> Option<[f64; 3]> {
    let mut active = [false; 3];

    for _ in 0..MAX_ROUNDS {
        let x = solve_free(m, b, &active)?;

        // primal feasibility
        let (worst, worst_val) = (0..3)
            .filter(|&i| !active[i])
            .map(|i| (i, x[i]))
            .fold((usize::MAX, -TOL), |acc, (i, v)| if v < acc.1 { (i, v) } else { acc });
        if worst != usize::MAX && worst_val < -TOL {
            active[worst] = true;
            continue;
        }

        // dual feasibility: λ_i = (M x - b)_i on the active bounds
        let mut release = None;
        let mut most_negative = -TOL;
        for i in (0..3).filter(|&i| active[i]) {
            let lambda = (0..3).map(|j| m[i][j] * x[j]).sum::<f64>() - b[i];
            if lambda < most_negative {
                most_negative = lambda;
                release = Some(i);
            }
        }
        match release {
            Some(i) => active[i] = false,
            None => return Some(x.map(|v| v.max(0.0))),
        }
    }
    None
}

/// Solve `M_FF x_F = b_F` over the free coordinates, with `x_i = 0` on the active ones.
fn solve_free(m: &[[f64; 3]; 3], b: &[f64; 3], active: &[bool; 3]) -> Option<[f64; 3]> {
    let free: Vec<usize> = (0..3).filter(|&i| !active[i]).collect();
    let k = free.len();
    let mut a = [[0.0f64; 4]; 3];
    for (r, &i) in free.iter().enumerate() {
        for (c, &j) in free.iter().enumerate() {
            a[r][c] = m[i][j];
        }
        a[r][k] = b[i];
    }

    // Gaussian elimination with partial pivoting
    for col in 0..k {
        let pivot = (col..k).max_by(|&r1, &r2| a[r1][col].abs().total_cmp(&a[r2][col].abs()))?;
        if a[pivot][col].abs() < TOL {
            return None;
        }
        a.swap(col, pivot);
        for r in (col + 1)..k {
            let f = a[r][col] / a[col][col];
            for c in col..=k {
                a[r][c] -= f * a[col][c];
            }
        }
    }
    let mut y = [0.0f64; 3];
    for r in (0..k).rev() {
        let mut s = a[r][k];
        for c in (r + 1)..k {
            s -= a[r][c] * y[c];
        }
        y[r] = s / a[r][r];
    }

    let mut x = [0.0f64; 3];
    for (r, &i) in free.iter().enumerate() {
        x[i] = y[r];
    }
    Some(x)
}

/// Normal equations for pendant weights `p_a, p_b, p_c` of three ring neighbours:
/// the three pairwise observations `d_ab ≈ p_a + p_b` (and so on), plus `k` observations
/// per node of the form `t ≈ p_a` whose sums are given in `extra`.
pub fn pendant_normal_equations(d_ab: f64, d_bc: f64, d_ac: f64, k: usize, extra: [f64; 3]) -> ([[f64; 3]; 3], [f64; 3]) {
    let diag = 2.0 + k as f64;
    let m = [[diag, 1.0, 1.0], [1.0, diag, 1.0], [1.0, 1.0, diag]];
    let b = [
        d_ab + d_ac + extra[0],
        d_ab + d_bc + extra[1],
        d_ac + d_bc + extra[2],
    ];
    (m, b)
}

/// Pendant weights for a triangle, falling back to the clamped unconstrained solution.
pub fn fit_pendants(d_ab: f64, d_bc: f64, d_ac: f64, k: usize, extra: [f64; 3]) -> [f64; 3] {
    let (m, b) = pendant_normal_equations(d_ab, d_bc, d_ac, k, extra);
    solve_nonnegative_qp3(&m, &b).unwrap_or_else(|| {
        log::debug!("local QP did not settle, using clamped unconstrained pendant weights");
        solve_free(&m, &b, &[false; 3])
            .map(|x| x.map(|v| v.max(0.0)))
            .unwrap_or([0.0; 3])
    })
}
