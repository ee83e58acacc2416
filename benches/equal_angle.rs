use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use splitsnet::algorithms::equal_angle::{equal_angle_apply, EqualAngleOpts};
use splitsnet::ordering::compute_ordering;
use splitsnet::weights::{fit_weights, NNLSParams};

fn make_distance_matrix(n: usize, seed: u64) -> Array2<f64> {
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

fn bench_equal_angle(c: &mut Criterion) {
    let mut group = c.benchmark_group("equal_angle");
    group.sample_size(10);
    for &n in &[30usize, 60, 120] {
        let dist = make_distance_matrix(n, 7);
        let ordering = compute_ordering(&dist, None).unwrap();
        let splits = fit_weights(&ordering.cycle, &dist, &NNLSParams::default(), None, None).unwrap();
        let labels: Vec<String> = (1..=n).map(|i| format!("t{i}")).collect();

        group.bench_with_input(BenchmarkId::new("plain", n), &splits, |b, s| {
            b.iter(|| equal_angle_apply(&EqualAngleOpts::default(), &labels, black_box(s), None).unwrap());
        });
        let daylight = EqualAngleOpts {
            daylight_iterations: 2,
            ..Default::default()
        };
        group.bench_with_input(BenchmarkId::new("daylight", n), &splits, |b, s| {
            b.iter(|| equal_angle_apply(&daylight, &labels, black_box(s), None).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_equal_angle);
criterion_main!(benches);
