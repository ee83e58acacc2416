use ndarray::{arr2, Array2};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use splitsnet::algorithms::equal_angle::EqualAngleOpts;
use splitsnet::error::is_cancelled;
use splitsnet::ordering::compute_ordering;
use splitsnet::progress::CancelFlag;
use splitsnet::splits::compatibility::Compatibility;
use splitsnet::splits::cycle::normalize_cycle;
use splitsnet::weights::NNLSParams;
use splitsnet::{run_splits_network, NetworkError};

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn random_matrix(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut m = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let v = rng.gen_range(1.0..10.0);
            m[[i, j]] = v;
            m[[j, i]] = v;
        }
    }
    m
}

/// True when `b` is `a` read from another start, in either direction.
fn same_circle(a: &[usize], b: &[usize]) -> bool {
    let n = a.len();
    if n != b.len() {
        return false;
    }
    let Some(start) = b.iter().position(|&t| t == a[0]) else {
        return false;
    };
    let forward = (0..n).all(|k| a[k] == b[(start + k) % n]);
    let backward = (0..n).all(|k| a[k] == b[(start + n - k) % n]);
    forward || backward
}

#[test]
fn quartet_tree_is_recovered() {
    let d = arr2(&[
        [0.0, 2.0, 5.0, 5.0],
        [2.0, 0.0, 5.0, 5.0],
        [5.0, 5.0, 0.0, 2.0],
        [5.0, 5.0, 2.0, 0.0],
    ]);
    let res = run_splits_network(
        &d,
        labels(&["A", "B", "C", "D"]),
        &NNLSParams::default(),
        &EqualAngleOpts::default(),
        None,
    )
    .unwrap();

    // A and B sit next to each other on the circle
    let pos = |t: usize| res.cycle.iter().position(|&x| x == t).unwrap();
    assert_eq!((pos(1) as i64 - pos(2) as i64).rem_euclid(4) % 2, 1);

    assert_eq!(res.splits.compatibility(), Compatibility::Compatible);
    assert_eq!(res.splits.nsplits(), 5);
    let internal: Vec<_> = res.splits.splits().filter(|s| !s.is_trivial()).collect();
    assert_eq!(internal.len(), 1);
    assert!(internal[0].separates(1, 3) && !internal[0].separates(1, 2));
    assert!((internal[0].weight - 3.0).abs() < 1e-6);
    for s in res.splits.splits().filter(|s| s.is_trivial()) {
        assert!((s.weight - 1.0).abs() < 1e-6);
    }

    assert_eq!(res.graph.count_nodes(), 6);
    assert_eq!(res.graph.count_edges(), 5);
    assert!((res.fit - 100.0).abs() < 1e-3);
}

#[test]
fn ordering_is_a_permutation_and_label_independent() {
    let n = 9;
    let d = random_matrix(n, 11);
    let ordering = compute_ordering(&d, None).unwrap();
    let mut sorted = ordering.cycle[1..].to_vec();
    sorted.sort_unstable();
    assert_eq!(sorted, (1..=n).collect::<Vec<_>>());
    assert_eq!(ordering.cycle[1], 1);

    // relabel taxon t as perm[t]
    let perm = [0, 4, 7, 1, 9, 2, 8, 3, 6, 5];
    let mut dp = Array2::<f64>::zeros((n, n));
    for i in 1..=n {
        for j in 1..=n {
            dp[[perm[i] - 1, perm[j] - 1]] = d[[i - 1, j - 1]];
        }
    }
    let permuted = compute_ordering(&dp, None).unwrap();
    let relabelled: Vec<usize> = ordering.cycle[1..].iter().map(|&t| perm[t]).collect();
    assert!(same_circle(&relabelled, &permuted.cycle[1..]));
}

#[test]
fn small_inputs_keep_identity_order() {
    for n in 1..=3 {
        let d = random_matrix(n, n as u64);
        assert_eq!(compute_ordering(&d, None).unwrap().cycle, (0..=n).collect::<Vec<_>>());
    }
}

#[test]
fn normalisation_is_idempotent() {
    let c = [0, 4, 2, 1, 5, 3];
    let once = normalize_cycle(&c).unwrap();
    assert_eq!(once, vec![0, 1, 5, 3, 4, 2]);
    assert_eq!(normalize_cycle(&once).unwrap(), once);
}

#[test]
fn random_network_realises_its_split_metric() {
    use petgraph::algo::dijkstra;
    use petgraph::visit::EdgeRef;

    let n = 8;
    let d = random_matrix(n, 5);
    let names: Vec<String> = (1..=n).map(|i| format!("t{i}")).collect();
    let res = run_splits_network(&d, names, &NNLSParams::default(), &EqualAngleOpts::default(), None).unwrap();
    assert_eq!(res.used_splits.count_ones(..), res.splits.nsplits());

    let g = &res.graph;
    for a in 1..=n {
        let va = g.base.get_taxon_node(a).unwrap();
        let dist = dijkstra(&g.base.graph, va, None, |e| e.weight().weight);
        for b in (a + 1)..=n {
            let vb = g.base.get_taxon_node(b).unwrap();
            let expected: f64 = res.splits.splits().filter(|s| s.separates(a, b)).map(|s| s.weight).sum();
            assert!((dist[&vb] - expected).abs() < 1e-8, "taxa {a},{b}");
        }
    }
}

#[test]
fn cancelled_run_returns_nothing() {
    let flag = CancelFlag::new();
    flag.cancel();
    let err = run_splits_network(
        &random_matrix(12, 3),
        (1..=12).map(|i| format!("t{i}")).collect(),
        &NNLSParams::default(),
        &EqualAngleOpts::default(),
        Some(&flag),
    )
    .unwrap_err();
    assert!(is_cancelled(&err));
}

#[test]
fn malformed_matrix_is_rejected_up_front() {
    let d = arr2(&[[0.0, 1.0, 2.0], [1.5, 0.0, 1.0], [2.0, 1.0, 0.0]]);
    let err = run_splits_network(
        &d,
        labels(&["a", "b", "c"]),
        &NNLSParams::default(),
        &EqualAngleOpts::default(),
        None,
    )
    .unwrap_err();
    assert!(err
        .chain()
        .any(|c| matches!(c.downcast_ref::<NetworkError>(), Some(NetworkError::InvalidInput(_)))));
}
