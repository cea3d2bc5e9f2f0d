//! Construction and query scaling benchmarks.
//!
//! Key questions:
//! - How does build time scale with n?
//! - What does the staged (low_memory) write strategy cost over striping?
//! - How does query latency respond to search_size?

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use descent::{Matrix, NNDescentIndex, NNDescentParams};

fn random_points(n: usize, dim: usize, seed: u64) -> Matrix<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Matrix::from_vec(n, (0..n * dim).map(|_| rng.gen::<f32>()).collect())
}

fn bench_build_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_scaling");
    group.sample_size(10);
    for n in [500usize, 2_000, 8_000] {
        let data = random_points(n, 32, 42);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &data, |b, data| {
            let params = NNDescentParams {
                n_neighbors: 15,
                seed: 42,
                ..Default::default()
            };
            b.iter(|| NNDescentIndex::build(black_box(data.clone()), &params).unwrap())
        });
    }
    group.finish();
}

fn bench_write_strategies(c: &mut Criterion) {
    let data = random_points(4_000, 32, 7);
    let mut group = c.benchmark_group("write_strategy");
    group.sample_size(10);
    for (label, low_memory) in [("striped", false), ("staged", true)] {
        group.bench_function(label, |b| {
            let params = NNDescentParams {
                n_neighbors: 15,
                seed: 7,
                low_memory,
                ..Default::default()
            };
            b.iter(|| NNDescentIndex::build(black_box(data.clone()), &params).unwrap())
        });
    }
    group.finish();
}

fn bench_query_search_size(c: &mut Criterion) {
    let data = random_points(10_000, 32, 21);
    let queries = random_points(100, 32, 22);
    let params = NNDescentParams {
        n_neighbors: 20,
        seed: 21,
        ..Default::default()
    };
    let index = NNDescentIndex::build(data, &params).unwrap();

    let mut group = c.benchmark_group("query_search_size");
    group.throughput(Throughput::Elements(queries.nrows() as u64));
    for search_size in [20usize, 50, 100, 200] {
        group.bench_with_input(
            BenchmarkId::from_parameter(search_size),
            &search_size,
            |b, &search_size| {
                b.iter(|| index.query(black_box(&queries), 10, search_size).unwrap())
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_build_scaling,
    bench_write_strategies,
    bench_query_search_size
);
criterion_main!(benches);
