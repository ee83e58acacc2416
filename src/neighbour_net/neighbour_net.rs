use anyhow::{anyhow, bail, Context, Result};
use fixedbitset::FixedBitSet;
use log::{debug, info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::Serialize;
use std::{fs, path::Path, time::Instant};

use crate::algorithms::equal_angle::{equal_angle_apply, EqualAngleOpts};
use crate::cli::NeighbourNetArgs;
use crate::data::splits_blocks::SplitsBlock;
use crate::error::NetworkError;
use crate::ordering::compute_ordering;
use crate::phylo::phylo_splits_graph::PhyloSplitsGraph;
use crate::progress::Progress;
use crate::splits::asplit::SplitSummary;
use crate::weights::{fit_weights, LeastSquares, NNLSParams};

/// Everything one NeighborNet run produces.
#[derive(Debug, Clone)]
pub struct NetworkAnalysis {
    pub labels: Vec<String>,
    /// `[0, t1, ..., tn]` with `t1 == 1`.
    pub cycle: Vec<usize>,
    pub splits: SplitsBlock,
    pub graph: PhyloSplitsGraph,
    pub used_splits: FixedBitSet,
    /// Least-squares fit in percent.
    pub fit: f32,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StageTimings {
    pub ordering_sec: f64,
    pub weights_sec: f64,
    pub network_sec: f64,
}

/// Ordering, split weights and network for an in-memory distance matrix.
///
/// - `dist`: symmetric `n×n` matrix, 0-based
/// - `labels`: taxon names, `labels[t - 1]` for taxon `t`
pub fn run_splits_network_from_memory(
    dist: &Array2<f64>,
    labels: Vec<String>,
    nnls: &NNLSParams,
    layout: &EqualAngleOpts,
    progress: Option<&dyn Progress>,
) -> Result<NetworkAnalysis> {
    let t0 = Instant::now();
    if labels.len() != dist.nrows() {
        bail!(NetworkError::invalid(format!(
            "{} labels for a {}x{} distance matrix",
            labels.len(),
            dist.nrows(),
            dist.ncols()
        )));
    }
    let mut timings = StageTimings::default();

    let t = Instant::now();
    let ordering = compute_ordering(dist, progress).context("Computing NeighborNet ordering")?;
    timings.ordering_sec = t.elapsed().as_secs_f64();
    debug!("Cycle (1-based): {:?}", &ordering.cycle[1..]);

    let t = Instant::now();
    let splits = fit_weights(
        &ordering.cycle,
        dist,
        nnls,
        Some(ordering.pendant_weights.as_slice()),
        progress,
    )
    .context("Estimating split weights")?;
    timings.weights_sec = t.elapsed().as_secs_f64();

    let t = Instant::now();
    let network = equal_angle_apply(layout, &labels, &splits, progress)
        .context("Building split network")?;
    timings.network_sec = t.elapsed().as_secs_f64();

    info!("Finished NeighborNet in {:?}", t0.elapsed());
    Ok(NetworkAnalysis {
        labels,
        fit: splits.fit(),
        cycle: network.cycle,
        splits,
        graph: network.graph,
        used_splits: network.used_splits,
        timings,
    })
}

pub struct NeighbourNet {
    out_dir: String,
    args: NeighbourNetArgs,
}

impl NeighbourNet {
    pub fn new(out_dir: String, args: NeighbourNetArgs) -> Self {
        NeighbourNet { out_dir, args }
    }

    pub fn run(&self) -> Result<NetworkAnalysis> {
        let t0 = Instant::now();

        let loaded = load_distance_matrix(&self.args.input).context("Loading distance matrix")?;
        let n = loaded.matrix.nrows();
        info!("Loaded distance matrix: {}x{}", n, n);

        let analysis = run_splits_network_from_memory(
            &loaded.matrix,
            loaded.labels.clone(),
            &self.args.nnls_params,
            &self.args.layout,
            None,
        )?;

        let t_out = Instant::now();
        let written = self.output_results(&analysis).context("Writing outputs")?;
        let output_sec = t_out.elapsed().as_secs_f64();

        let meta_path = Path::new(&self.out_dir).join("meta.json");
        let meta = self.build_run_log(&loaded.meta, &analysis, output_sec, t0.elapsed().as_secs_f64());
        fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)
            .with_context(|| format!("Writing {}", meta_path.display()))?;

        info!("Outputs:");
        info!("  {}", written.display());
        info!("  {}", meta_path.display());
        info!("Done in {:.3}s total.", t0.elapsed().as_secs_f64());
        Ok(analysis)
    }

    /// Write `<prefix>.network.json` and return its path.
    fn output_results(&self, analysis: &NetworkAnalysis) -> Result<std::path::PathBuf> {
        fs::create_dir_all(&self.out_dir).with_context(|| format!("Creating {}", self.out_dir))?;
        let path = Path::new(&self.out_dir).join(format!("{}.network.json", self.args.output_prefix));
        let snapshot = analysis.graph.snapshot();
        fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Writing {}", path.display()))?;
        Ok(path)
    }

    fn build_run_log(
        &self,
        parse: &ParseMeta,
        analysis: &NetworkAnalysis,
        output_sec: f64,
        total_sec: f64,
    ) -> RunLog {
        let n = analysis.labels.len();
        let nnls = &self.args.nnls_params;

        let (num_trivial, num_nontrivial, sum_weights) = analysis
            .splits
            .get_splits()
            .par_iter()
            .fold(
                || (0usize, 0usize, 0.0f64),
                |mut acc, s| {
                    if s.is_trivial() {
                        acc.0 += 1;
                    } else {
                        acc.1 += 1;
                    }
                    acc.2 += s.get_weight();
                    acc
                },
            )
            .reduce(|| (0, 0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1, a.2 + b.2));

        RunLog {
            input: self.args.input.clone(),
            out_dir: self.out_dir.clone(),
            labels: analysis.labels.clone(),
            cycle: analysis.cycle[1..].to_vec(),
            matrix: MatrixMeta {
                n,
                npairs: n * n.saturating_sub(1) / 2,
                delimiter: parse.delimiter.to_string(),
                has_header: parse.has_header,
                has_index: parse.has_index,
                symmetry_pairs_fixed: parse.symmetry_pairs_fixed,
            },
            nnls: NNLSMeta {
                cutoff: nnls.cutoff,
                least_squares: nnls.least_squares,
                star: nnls.star,
                cgnr_iterations: nnls.cgnr_iterations,
                cgnr_tolerance: nnls.cgnr_tolerance,
                active_set_rho: nnls.active_set_rho,
                num_splits: analysis.splits.nsplits(),
                num_trivial_splits: num_trivial,
                num_nontrivial_splits: num_nontrivial,
                sum_weights,
            },
            network: NetworkMeta {
                nodes: analysis.graph.count_nodes(),
                edges: analysis.graph.count_edges(),
                splits_drawn: analysis.used_splits.count_ones(..),
                compatibility: analysis.splits.compatibility().as_str(),
                layout: self.args.layout.clone(),
            },
            splits: analysis.splits.summaries(),
            fit_percent: analysis.fit,
            timings: RunTimings {
                load_sec: parse.load_sec,
                stages: analysis.timings.clone(),
                output_sec,
                total_sec,
            },
            system: SystemStats {
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
                rayon_threads: rayon::current_num_threads(),
            },
        }
    }
}

/* ───────────── metadata structs ───────────── */

#[derive(Serialize, Clone, Debug)]
pub struct ParseMeta {
    pub delimiter: char,
    pub has_header: bool,
    pub has_index: bool,
    pub symmetry_pairs_fixed: usize,
    pub load_sec: f64,
}

#[derive(Serialize)]
struct MatrixMeta {
    n: usize,
    npairs: usize,
    delimiter: String,
    has_header: bool,
    has_index: bool,
    symmetry_pairs_fixed: usize,
}

#[derive(Serialize)]
struct NNLSMeta {
    cutoff: f64,
    least_squares: LeastSquares,
    star: bool,
    cgnr_iterations: usize,
    cgnr_tolerance: f64,
    active_set_rho: f64,
    num_splits: usize,
    num_trivial_splits: usize,
    num_nontrivial_splits: usize,
    sum_weights: f64,
}

#[derive(Serialize)]
struct NetworkMeta {
    nodes: usize,
    edges: usize,
    splits_drawn: usize,
    compatibility: &'static str,
    layout: EqualAngleOpts,
}

#[derive(Serialize)]
struct RunTimings {
    load_sec: f64,
    #[serde(flatten)]
    stages: StageTimings,
    output_sec: f64,
    total_sec: f64,
}

#[derive(Serialize)]
struct SystemStats {
    os: String,
    arch: String,
    rayon_threads: usize,
}

#[derive(Serialize)]
struct RunLog {
    input: String,
    out_dir: String,
    labels: Vec<String>,
    cycle: Vec<usize>,
    matrix: MatrixMeta,
    nnls: NNLSMeta,
    network: NetworkMeta,
    splits: Vec<SplitSummary>,
    fit_percent: f32,
    timings: RunTimings,
    system: SystemStats,
}

/* ───────────── loading ───────────── */

/// A parsed distance matrix with its taxon labels.
#[derive(Debug, Clone)]
pub struct LoadedMatrix {
    pub matrix: Array2<f64>,
    pub labels: Vec<String>,
    pub meta: ParseMeta,
}

/// Parse a CSV/TSV/`;`/`|`/space-delimited square matrix. Header row and
/// index column are optional and sniffed; without either, taxa are named
/// `t1..tn`. Asymmetric pairs are averaged with a warning.
pub fn load_distance_matrix(path: &str) -> Result<LoadedMatrix> {
    let t_load = Instant::now();
    let text = fs::read_to_string(path).with_context(|| format!("Reading '{}'", path))?;

    let first_line = text
        .lines()
        .find(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        .ok_or_else(|| anyhow!("no data lines found"))?;
    let delim = detect_delim(first_line);
    debug!("Detected delimiter: {:?}", delim);

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .delimiter(delim as u8)
        .from_reader(text.as_bytes());

    let mut rows: Vec<Vec<String>> = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        let row: Vec<String> = rec
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| delim != ' ' || !s.is_empty())
            .collect();
        if row.iter().any(|t| !t.is_empty()) {
            rows.push(row);
        }
    }
    if rows.is_empty() {
        bail!(NetworkError::invalid("empty distance table"));
    }

    let (has_header, has_index) = sniff_header_index(&rows);
    debug!("Header: {}, Index column: {}", has_header, has_index);

    let start_row = usize::from(has_header);
    let start_col = usize::from(has_index);
    let labels: Vec<String> = match (has_header, has_index) {
        (true, true) => rows[0].iter().skip(1).cloned().collect(),
        (true, false) => rows[0].clone(),
        (false, true) => rows.iter().map(|r| r[0].clone()).collect(),
        (false, false) => (1..=rows.len()).map(|i| format!("t{}", i)).collect(),
    };

    let n = rows.len() - start_row;
    for (ri, row) in rows[start_row..].iter().enumerate() {
        let m = row.len().saturating_sub(start_col);
        if m != n {
            bail!(NetworkError::invalid(format!(
                "distance table is not square: {} rows but row {} has {} values",
                n,
                ri + start_row + 1,
                m
            )));
        }
    }

    let mut mat = Array2::<f64>::zeros((n, n));
    for (ri, row) in rows[start_row..].iter().enumerate() {
        for (ci, tok) in row[start_col..].iter().enumerate() {
            mat[[ri, ci]] = tok.parse().with_context(|| {
                format!(
                    "Parsing number at row {}, col {}",
                    ri + start_row + 1,
                    ci + start_col + 1
                )
            })?;
        }
    }

    let mut symmetry_pairs_fixed = 0usize;
    for i in 0..n {
        mat[[i, i]] = 0.0;
        for j in (i + 1)..n {
            let (a, b) = (mat[[i, j]], mat[[j, i]]);
            if (a - b).abs() > 1e-12 {
                let avg = 0.5 * (a + b);
                mat[[i, j]] = avg;
                mat[[j, i]] = avg;
                symmetry_pairs_fixed += 1;
            }
        }
    }
    if symmetry_pairs_fixed > 0 {
        warn!(
            "Distance matrix not perfectly symmetric; averaged {} off-diagonal pairs",
            symmetry_pairs_fixed
        );
    }

    let labels = if labels.len() == n {
        labels
    } else {
        warn!(
            "Label count ({}) != n ({}). Synthesizing t1..tn labels.",
            labels.len(),
            n
        );
        (1..=n).map(|i| format!("t{}", i)).collect()
    };

    Ok(LoadedMatrix {
        matrix: mat,
        labels,
        meta: ParseMeta {
            delimiter: delim,
            has_header,
            has_index,
            symmetry_pairs_fixed,
            load_sec: t_load.elapsed().as_secs_f64(),
        },
    })
}

/// The delimiter with the most hits among common choices.
fn detect_delim(line: &str) -> char {
    let cands = [',', '\t', ';', '|', ' '];
    let mut best = (0usize, ',');
    for &c in &cands {
        let count = line.matches(c).count();
        if count > best.0 {
            best = (count, c);
        }
    }
    best.1
}

/// An index column has non-numeric first cells in at least two of the first
/// ten rows, one of them past the first row. A header row has non-numeric
/// cells (index excluded) or fewer numbers than the row below it.
fn sniff_header_index(rows: &[Vec<String>]) -> (bool, bool) {
    let is_num = |s: &str| s.parse::<f64>().is_ok();
    if rows.is_empty() {
        return (false, false);
    }

    let mut nonnum_first_col_total = 0usize;
    let mut nonnum_first_col_after_first = 0usize;
    for (i, r) in rows.iter().take(10).enumerate() {
        if r.first().is_some_and(|c| !is_num(c)) {
            nonnum_first_col_total += 1;
            if i > 0 {
                nonnum_first_col_after_first += 1;
            }
        }
    }
    let has_index = nonnum_first_col_after_first >= 1 && nonnum_first_col_total >= 2;

    let skip = usize::from(has_index);
    let cells = |r: &[String]| -> Vec<String> { r.iter().skip(skip).cloned().collect() };
    let first = cells(&rows[0]);
    let first_num_count = first.iter().filter(|s| is_num(s)).count();
    let second_num_count = rows
        .get(1)
        .map(|r| cells(r).iter().filter(|s| is_num(s)).count())
        .unwrap_or(first_num_count);

    let has_header = first.iter().any(|s| !is_num(s)) || first_num_count < second_num_count;
    (has_header, has_index)
}

#[cfg(test)]
mod read_matrix_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(content: &str) -> Result<LoadedMatrix> {
        let mut tf = NamedTempFile::new().unwrap();
        tf.write_all(content.as_bytes()).unwrap();
        load_distance_matrix(&tf.path().to_string_lossy())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12
    }

    #[test]
    fn csv_header_and_index() {
        let m = load(",A,B,C\nA,0,1,2\nB,1,0,3\nC,2,3,0\n").unwrap();
        assert_eq!(m.labels, vec!["A", "B", "C"]);
        assert!(m.meta.has_header && m.meta.has_index);
        assert_eq!(m.meta.symmetry_pairs_fixed, 0);
        assert_eq!(m.matrix.shape(), &[3, 3]);
        assert!(approx(m.matrix[[0, 1]], 1.0));
        assert!(approx(m.matrix[[1, 2]], 3.0));
        assert!(approx(m.matrix[[2, 0]], 2.0));
    }

    #[test]
    fn csv_header_no_index() {
        let m = load("A,B,C\n0,1,2\n1,0,3\n2,3,0\n").unwrap();
        assert_eq!(m.labels, vec!["A", "B", "C"]);
        assert!(m.meta.has_header);
        assert!(!m.meta.has_index);
    }

    #[test]
    fn tsv_index_no_header() {
        let m = load("A\t0\t1\t2\nB\t1\t0\t3\nC\t2\t3\t0\n").unwrap();
        assert_eq!(m.labels, vec!["A", "B", "C"]);
        assert!(!m.meta.has_header);
        assert!(m.meta.has_index);
        assert!(approx(m.matrix[[0, 2]], 2.0));
    }

    #[test]
    fn space_delimited_gets_synthetic_labels() {
        let m = load("0 1 2\n1 0 3\n2 3 0\n").unwrap();
        assert_eq!(m.labels, vec!["t1", "t2", "t3"]);
        assert!(!m.meta.has_header && !m.meta.has_index);
        assert_eq!(m.meta.delimiter, ' ');
    }

    #[test]
    fn semicolon_header_no_index() {
        let m = load("A;B;C\n0;1;2\n1;0;3\n2;3;0\n").unwrap();
        assert_eq!(m.labels, vec!["A", "B", "C"]);
        assert_eq!(m.meta.delimiter, ';');
    }

    #[test]
    fn asymmetry_is_averaged_and_counted() {
        let m = load("A,B,C\n0,1.0,2.0\n1.1,0,3.0\n2.0,3.0,0\n").unwrap();
        assert_eq!(m.meta.symmetry_pairs_fixed, 1);
        assert!(approx(m.matrix[[0, 1]], 1.05));
        assert!(approx(m.matrix[[1, 0]], 1.05));
    }

    #[test]
    fn non_square_rejected() {
        let err = load("A,B\n0,1\n1,0\n2,3\n").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NetworkError>(),
            Some(NetworkError::InvalidInput(_))
        ));
    }
}
