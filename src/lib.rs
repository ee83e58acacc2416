use std::env;

use anyhow::Result;
use env_logger::Builder;
use log::{info, warn, LevelFilter};
use ndarray::Array2;

use crate::{
    algorithms::equal_angle::EqualAngleOpts,
    cli::ProgramArgs,
    neighbour_net::neighbour_net::{run_splits_network_from_memory, NetworkAnalysis},
    progress::Progress,
    weights::NNLSParams,
};

pub mod algorithms;
pub mod cli;
pub mod data;
pub mod error;
pub mod neighbour_net;
pub mod ordering;
pub mod phylo;
pub mod progress;
pub mod splits;
pub mod utils;
pub mod weights;

pub use error::NetworkError;

pub fn set_log_level(matches: &ProgramArgs, is_last: bool, program_name: &str, version: &str) {
    let mut log_level = LevelFilter::Info;
    let mut specified = false;
    if matches.verbose {
        specified = true;
        log_level = LevelFilter::Debug;
    }
    if matches.quiet {
        specified = true;
        log_level = LevelFilter::Error;
    }
    if specified || is_last {
        let mut builder = Builder::new();
        builder.filter_level(log_level);
        if let Ok(filters) = env::var("RUST_LOG") {
            builder.parse_filters(&filters);
        }
        if builder.try_init().is_err() {
            warn!("Logger already initialised; keeping the existing log level");
        }
    }
    if is_last {
        info!("{} version {}", program_name, version);
    }
}

/// The single entry point for embedding callers: ordering, split weights and
/// laid-out network for an in-memory distance matrix.
///
/// - `dist`: square distance matrix (n x n)
/// - `labels`: length n
pub fn run_splits_network(
    dist: &Array2<f64>,
    labels: Vec<String>,
    nnls: &NNLSParams,
    layout: &EqualAngleOpts,
    progress: Option<&dyn Progress>,
) -> Result<NetworkAnalysis> {
    run_splits_network_from_memory(dist, labels, nnls, layout, progress)
}
