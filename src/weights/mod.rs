pub mod active_set_weights;
pub mod local_qp;

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::Array2;
use std::time::Instant;

use crate::data::splits_blocks::SplitsBlock;
use crate::error::NetworkError;
use crate::progress::Progress;
use crate::splits::compatibility::compute_compatibility;
use crate::splits::cycle::normalize_cycle;
use crate::utils::{compute_least_squares_fit, validate_distance_matrix};

pub use active_set_weights::{LeastSquares, NNLSParams};

/// Fit non-negative weights to every circular split of `cycle`.
///
/// `warm_start` holds per-taxon pendant weights (index 0 unused) and seeds the
/// star fit; full fits start from the unconstrained optimum instead.
pub fn fit_weights(
    cycle: &[usize],
    distances: &Array2<f64>,
    params: &NNLSParams,
    warm_start: Option<&[f64]>,
    progress: Option<&dyn Progress>,
) -> Result<SplitsBlock> {
    validate_distance_matrix(distances)?;
    let cycle = normalize_cycle(cycle)?;
    let n = cycle.len() - 1;
    if n != distances.nrows() {
        bail!(NetworkError::invalid(format!(
            "cycle covers {} taxa but the distance matrix has {}",
            n,
            distances.nrows()
        )));
    }

    let start = Instant::now();
    let mut params = params.clone();
    let (_weights, pairs) =
        active_set_weights::compute_use_1d_from(&cycle, distances, &mut params, progress, warm_start)
            .context("split weight estimation failed")?;
    let splits = active_set_weights::pairs_to_asplits(pairs, n);

    let mut block = SplitsBlock::from_splits(splits);
    block.set_threshold(params.cutoff);
    block.set_fit(compute_least_squares_fit(distances, block.get_splits()));
    block.set_compatibility(compute_compatibility(block.get_splits(), &cycle));
    block.set_cycle(&cycle)?;

    info!(
        "Fitted {} splits ({:?} least squares{}) in {:?}: fit {:.4}%, {}",
        block.nsplits(),
        params.least_squares,
        if params.star { ", star" } else { "" },
        start.elapsed(),
        block.fit(),
        block.compatibility().as_str()
    );
    Ok(block)
}
