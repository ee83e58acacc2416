mod agglomerate;
mod expansion;
mod net_node;

use anyhow::{Context, Result};
use log::debug;
use ndarray::Array2;

use crate::progress::{self, Progress};
use crate::utils::validate_distance_matrix;

use self::net_node::NetArena;

/// A NeighborNet circular ordering with the pendant weights estimated while expanding it.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborNetOrdering {
    /// `[0, t1, ..., tn]`, read from taxon 1.
    pub cycle: Vec<usize>,
    /// Provisional trivial-split weight per taxon, indexed `1..=n` (`[0]` unused).
    pub pendant_weights: Vec<f64>,
}

/// Compute the NeighborNet circular ordering (Bryant & Huson 2005).
/// - `dist` is 0-based, shape n×n, symmetric with 0 on the diagonal.
/// - The cycle is 1-based with a leading 0 sentinel: `[0, t1, t2, ..., tn]`.
pub fn compute_ordering(dist: &Array2<f64>, progress: Option<&dyn Progress>) -> Result<NeighborNetOrdering> {
    validate_distance_matrix(dist)?;
    let n_tax = dist.nrows();
    progress::check(progress)?;

    if n_tax <= 3 {
        return Ok(NeighborNetOrdering {
            cycle: (0..=n_tax).collect(),
            pendant_weights: three_point_pendants(dist),
        });
    }

    if let Some(p) = progress {
        p.set_maximum_progress(2 * n_tax);
    }

    let mut arena = NetArena::new(dist);
    let joins = agglomerate::join_nodes(&mut arena, progress).context("agglomerating nodes")?;
    debug!("NeighborNet recorded {} amalgamations", joins.len());
    let expansion = expansion::expand_nodes(&mut arena, joins, progress).context("expanding nodes")?;

    Ok(NeighborNetOrdering {
        cycle: expansion.cycle,
        pendant_weights: expansion.pendant,
    })
}

/// Pendant weights for up to three taxa, clamped at zero.
fn three_point_pendants(dist: &Array2<f64>) -> Vec<f64> {
    let n = dist.nrows();
    let mut p = vec![0.0; n + 1];
    match n {
        2 => {
            p[1] = 0.5 * dist[[0, 1]];
            p[2] = p[1];
        }
        3 => {
            let (ab, bc, ac) = (dist[[0, 1]], dist[[1, 2]], dist[[0, 2]]);
            p[1] = (0.5 * (ab + ac - bc)).max(0.0);
            p[2] = (0.5 * (ab + bc - ac)).max(0.0);
            p[3] = (0.5 * (ac + bc - ab)).max(0.0);
        }
        _ => {}
    }
    p
}
