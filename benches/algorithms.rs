//! Benchmarks for rate-limiting algorithms over the memory backend.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use throttlecache::{Algorithm, FixedWindow, Gcra, LeakyBucket, MemoryBackend, SlidingWindow, TokenBucket};
use tokio::runtime::Runtime;

fn bench_algorithms(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("algorithms");

    group.bench_function("gcra", |b| {
        let backend = MemoryBackend::new();
        let algorithm = Gcra::new(std::time::Duration::from_millis(1), 100).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("gcra:{}", i % 100);
            rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1000.0).await) })
        })
    });

    group.bench_function("token_bucket", |b| {
        let backend = MemoryBackend::new();
        let algorithm = TokenBucket::new(100.0, 1000.0).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("token:{}", i % 100);
            rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1000.0).await) })
        })
    });

    group.bench_function("leaky_bucket", |b| {
        let backend = MemoryBackend::new();
        let algorithm = LeakyBucket::new(100.0, 1000.0).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("leaky:{}", i % 100);
            rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1000.0).await) })
        })
    });

    group.bench_function("fixed_window", |b| {
        let backend = MemoryBackend::new();
        let algorithm = FixedWindow::new(100, std::time::Duration::from_secs(1)).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("fixed:{}", i % 100);
            rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1000.0).await) })
        })
    });

    group.bench_function("sliding_window", |b| {
        let backend = MemoryBackend::new();
        let algorithm = SlidingWindow::new(100, std::time::Duration::from_secs(1)).unwrap();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("sliding:{}", i % 100);
            rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1000.0).await) })
        })
    });

    group.finish();
}

fn bench_algorithm_scaling_by_key_count(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("algorithm_key_scaling");

    for num_keys in [1, 10, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("gcra", num_keys), num_keys, |b, &num_keys| {
            let backend = MemoryBackend::new();
            let algorithm = Gcra::new(std::time::Duration::from_micros(1), 10_000).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("k:{}", i % num_keys);
                rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1_000_000.0).await) })
            })
        });

        group.bench_with_input(BenchmarkId::new("fixed_window", num_keys), num_keys, |b, &num_keys| {
            let backend = MemoryBackend::new();
            let algorithm = FixedWindow::new(10_000, std::time::Duration::from_secs(1)).unwrap();
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("k:{}", i % num_keys);
                rt.block_on(async { black_box(algorithm.try_acquire(&backend, &key, i as f64 / 1_000_000.0).await) })
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_algorithms, bench_algorithm_scaling_by_key_count);
criterion_main!(benches);
