//! Benchmarks for distance kernels.
//!
//! Run with: `cargo bench`
//!
//! # Reproducibility
//!
//! All benchmarks use seed 42, dimensions 128/384/768/1536, and a uniform
//! [-1, 1] distribution.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use omvec::metric::quantized::l2_squared_sq8;
use omvec::metric::{hamming, CosineDistance, InnerProduct, L2Squared, Metric};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::hint::black_box;

const DIMS: [usize; 4] = [128, 384, 768, 1536];

/// Generates deterministic test vectors.
fn generate_vectors(count: usize, dims: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn bench_l2_squared(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_squared");
    for dims in DIMS {
        let vectors = generate_vectors(2, dims, 42);
        let (a, b) = (&vectors[0], &vectors[1]);

        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |bencher, _| {
            bencher.iter(|| L2Squared::distance(black_box(a), black_box(b)));
        });
    }
    group.finish();
}

fn bench_cosine(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine");
    for dims in DIMS {
        let vectors = generate_vectors(2, dims, 42);
        let (a, b) = (&vectors[0], &vectors[1]);

        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |bencher, _| {
            bencher.iter(|| CosineDistance::distance(black_box(a), black_box(b)));
        });
    }
    group.finish();
}

fn bench_inner_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("inner_product");
    for dims in DIMS {
        let vectors = generate_vectors(2, dims, 42);
        let (a, b) = (&vectors[0], &vectors[1]);

        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |bencher, _| {
            bencher.iter(|| InnerProduct::distance(black_box(a), black_box(b)));
        });
    }
    group.finish();
}

fn bench_l2_squared_sq8(c: &mut Criterion) {
    let mut group = c.benchmark_group("l2_squared_sq8");
    for dims in DIMS {
        let vectors = generate_vectors(2, dims, 42);
        let query = &vectors[0];
        let params = omvec::store::scalar8::quantize_params(&vectors[1]);
        let mut code = vec![0u8; dims];
        omvec::store::scalar8::encode_into(&vectors[1], params, &mut code);

        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |bencher, _| {
            bencher.iter(|| {
                l2_squared_sq8(
                    black_box(query),
                    black_box(&code),
                    params.scale,
                    params.offset,
                )
            });
        });
    }
    group.finish();
}

fn bench_hamming(c: &mut Criterion) {
    let mut group = c.benchmark_group("hamming");
    for dims in DIMS {
        let vectors = generate_vectors(2, dims, 42);
        let width = omvec::store::binary::packed_len(dims);
        let mut a = vec![0u8; width];
        let mut b = vec![0u8; width];
        omvec::store::binary::pack_signs(&vectors[0], &mut a);
        omvec::store::binary::pack_signs(&vectors[1], &mut b);

        group.throughput(Throughput::Elements(dims as u64));
        group.bench_with_input(BenchmarkId::from_parameter(dims), &dims, |bencher, _| {
            bencher.iter(|| hamming(black_box(&a), black_box(&b)));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_l2_squared,
    bench_cosine,
    bench_inner_product,
    bench_l2_squared_sq8,
    bench_hamming
);
criterion_main!(benches);
