//! Statistics engine benchmark
//!
//! Measures the per-candidate cost of the acceptance decision: one
//! aggregate comparison plus one comparison per test, for suites of
//! realistic size.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench statistics_engine
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use perfminer::significance::{assess_improvement, compare_timings, SignificanceConfig};
use std::collections::BTreeMap;

/// Deterministic timings around `base` with a few percent of jitter
fn timings(base: f64, n: usize, seed: usize) -> Vec<f64> {
    (0..n)
        .map(|i| base * (1.0 + (((i * 7919 + seed * 104_729) % 97) as f64 - 48.0) / 1600.0))
        .collect()
}

fn suite(tests: usize, repeats: usize) -> BTreeMap<String, (Vec<f64>, Vec<f64>)> {
    (0..tests)
        .map(|t| {
            let base = 0.01 + (t % 13) as f64 * 0.02;
            (
                format!("Suite{}.Case{}", t / 10, t % 10),
                (timings(base, repeats, t), timings(base * 0.8, repeats, t + 1)),
            )
        })
        .collect()
}

fn bench_compare_timings(c: &mut Criterion) {
    let config = SignificanceConfig::default();
    let mut group = c.benchmark_group("compare_timings");
    for repeats in [6usize, 10, 30, 100] {
        let old = timings(0.40, repeats, 1);
        let new = timings(0.30, repeats, 2);
        group.bench_with_input(BenchmarkId::from_parameter(repeats), &repeats, |b, _| {
            b.iter(|| compare_timings(black_box(&old), black_box(&new), &config))
        });
    }
    group.finish();
}

fn bench_assess_improvement(c: &mut Criterion) {
    let config = SignificanceConfig::default();
    let mut group = c.benchmark_group("assess_improvement");
    for tests in [10usize, 100, 1000] {
        let data = suite(tests, 10);
        group.bench_with_input(BenchmarkId::from_parameter(tests), &data, |b, data| {
            b.iter(|| assess_improvement(black_box(data), &config))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compare_timings, bench_assess_improvement);
criterion_main!(benches);
