//! Benchmarks for backend operations (memory backend; other backends require
//! their feature flags and an available embedded server).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use throttlecache::{Backend, MemoryBackend};
use tokio::runtime::Runtime;

fn bench_backend_operations(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("backend");

    group.bench_function("get_existing", |b| {
        let backend = MemoryBackend::new();
        rt.block_on(async {
            backend.set("bench:key", b"payload".to_vec(), Duration::from_secs(3600)).await.unwrap();
        });
        b.iter(|| rt.block_on(async { black_box(backend.get("bench:key").await) }))
    });

    group.bench_function("get_missing", |b| {
        let backend = MemoryBackend::new();
        b.iter(|| rt.block_on(async { black_box(backend.get("nonexistent:key").await) }))
    });

    group.bench_function("set", |b| {
        let backend = MemoryBackend::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:set:{i}");
            rt.block_on(async { black_box(backend.set(&key, b"payload".to_vec(), Duration::from_secs(3600)).await) })
        })
    });

    group.bench_function("incr", |b| {
        let backend = MemoryBackend::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("bench:incr:{}", i % 100);
            rt.block_on(async { black_box(backend.incr(&key, 1, Duration::from_secs(3600)).await) })
        })
    });

    group.bench_function("cas", |b| {
        let backend = MemoryBackend::new();
        rt.block_on(async {
            backend.set("bench:cas", 0i64.to_le_bytes().to_vec(), Duration::from_secs(3600)).await.unwrap();
        });
        b.iter(|| {
            rt.block_on(async {
                let current = backend.get("bench:cas").await.unwrap();
                black_box(backend.cas("bench:cas", current.as_deref(), 1i64.to_le_bytes().to_vec(), Duration::from_secs(3600)).await)
            })
        })
    });

    group.finish();
}

fn bench_backend_scaling(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("backend_key_scaling");

    for num_keys in [100, 1000, 10000].iter() {
        group.bench_with_input(BenchmarkId::new("get_with_entries", num_keys), num_keys, |b, &num_keys| {
            let backend = MemoryBackend::new();
            rt.block_on(async {
                for i in 0..num_keys {
                    let key = format!("scale:{i}");
                    backend.set(&key, i.to_le_bytes().to_vec(), Duration::from_secs(3600)).await.unwrap();
                }
            });
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("scale:{}", i % num_keys);
                rt.block_on(async { black_box(backend.get(&key).await) })
            })
        });
    }

    group.finish();
}

fn bench_concurrent_counters(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("backend_concurrent_counters");

    group.bench_function("incr_same_key", |b| {
        let backend = MemoryBackend::new();
        b.iter(|| rt.block_on(async { black_box(backend.incr("hotkey", 1, Duration::from_secs(3600)).await) }))
    });

    group.bench_function("incr_distributed_keys", |b| {
        let backend = MemoryBackend::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("dist:{}", i % 1000);
            rt.block_on(async { black_box(backend.incr(&key, 1, Duration::from_secs(3600)).await) })
        })
    });

    group.finish();
}

criterion_group!(benches, bench_backend_operations, bench_backend_scaling, bench_concurrent_counters);
criterion_main!(benches);
