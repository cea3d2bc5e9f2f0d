//! Benchmarks for distance computations.
//!
//! The local join evaluates one kernel per candidate pair, so kernel cost
//! dominates construction. The interesting comparisons are canonical vs
//! alternative forms: the alternative drops the monotone tail (sqrt, log)
//! from the hot loop.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use descent::distance;

fn random_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect()
}

fn positive_vectors(n: usize, dim: usize) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(43);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() + 0.01).collect())
        .collect()
}

fn bench_canonical_vs_alternative(c: &mut Criterion) {
    let dim = 128;
    let vectors = random_vectors(256, dim);
    let positive = positive_vectors(256, dim);

    let mut group = c.benchmark_group("canonical_vs_alternative");
    group.throughput(Throughput::Elements(vectors.len() as u64));

    group.bench_function("euclidean", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for pair in vectors.chunks_exact(2) {
                acc += distance::euclidean(black_box(&pair[0]), black_box(&pair[1]));
            }
            acc
        })
    });
    group.bench_function("sqeuclidean", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for pair in vectors.chunks_exact(2) {
                acc += distance::sqeuclidean(black_box(&pair[0]), black_box(&pair[1]));
            }
            acc
        })
    });
    group.bench_function("cosine", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for pair in positive.chunks_exact(2) {
                acc += distance::cosine(black_box(&pair[0]), black_box(&pair[1]));
            }
            acc
        })
    });
    group.bench_function("alternative_cosine", |b| {
        b.iter(|| {
            let mut acc = 0.0f32;
            for pair in positive.chunks_exact(2) {
                acc += distance::alternative_cosine(black_box(&pair[0]), black_box(&pair[1]));
            }
            acc
        })
    });
    group.finish();
}

fn bench_kernels_by_dimension(c: &mut Criterion) {
    let mut group = c.benchmark_group("sqeuclidean_by_dim");
    for dim in [16, 64, 256, 1024] {
        let vectors = random_vectors(64, dim);
        group.throughput(Throughput::Elements(32));
        group.bench_with_input(BenchmarkId::from_parameter(dim), &vectors, |b, vectors| {
            b.iter(|| {
                let mut acc = 0.0f32;
                for pair in vectors.chunks_exact(2) {
                    acc += distance::sqeuclidean(black_box(&pair[0]), black_box(&pair[1]));
                }
                acc
            })
        });
    }
    group.finish();
}

fn bench_distribution_kernels(c: &mut Criterion) {
    let dim = 128;
    let positive = positive_vectors(64, dim);

    let mut group = c.benchmark_group("distribution_kernels");
    group.throughput(Throughput::Elements(32));
    for (name, kernel) in [
        ("hellinger", distance::hellinger as fn(&[f32], &[f32]) -> f32),
        ("jensen_shannon", distance::jensen_shannon),
        ("symmetric_kl", distance::symmetric_kl),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut acc = 0.0f32;
                for pair in positive.chunks_exact(2) {
                    acc += kernel(black_box(&pair[0]), black_box(&pair[1]));
                }
                acc
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_canonical_vs_alternative,
    bench_kernels_by_dimension,
    bench_distribution_kernels
);
criterion_main!(benches);
