//! Benchmark for the code registry
//!
//! Covers registration, lookup, expiry sweeps and contended access.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use rendezvous_exchange::registry::{CodeRegistry, DEFAULT_CODE_TTL};
use std::sync::Arc;

fn prefilled(count: usize) -> Arc<CodeRegistry> {
    let registry = CodeRegistry::new();
    for i in 0..count {
        registry.put(format!("code-{:05}", i), format!("10.0.{}.{}", i / 256, i % 256), "203.0.113.9");
    }
    registry
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("code_registry");
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_new_code", |b| {
        let registry = CodeRegistry::new();
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            registry.put(
                black_box(format!("code-{}", counter)),
                "10.0.0.5",
                "203.0.113.9",
            );
        });
    });

    group.bench_function("put_overwrite", |b| {
        let registry = prefilled(1000);
        let mut counter = 0u64;

        b.iter(|| {
            counter += 1;
            let code = format!("code-{:05}", counter % 1000);
            registry.put(black_box(code), "10.0.0.7", "198.51.100.1");
        });
    });

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("code_registry");
    group.throughput(Throughput::Elements(1));

    let registry = prefilled(10_000);

    group.bench_function("get_hit", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let code = format!("code-{:05}", counter % 10_000);
            black_box(registry.get(&code));
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(registry.get(black_box("missing"))));
    });

    group.finish();
}

fn bench_evict_expired(c: &mut Criterion) {
    let mut group = c.benchmark_group("code_registry");
    group.throughput(Throughput::Elements(10_000));

    group.bench_function("evict_half_of_10k", |b| {
        b.iter_batched(
            || {
                let registry = CodeRegistry::new();
                let stale = Utc::now() - chrono::Duration::hours(1);
                for i in 0..10_000 {
                    let at = if i % 2 == 0 { stale } else { Utc::now() };
                    registry.put_at(format!("code-{:05}", i), "10.0.0.5", "203.0.113.9", at);
                }
                registry
            },
            |registry| black_box(registry.evict_expired(DEFAULT_CODE_TTL, Utc::now())),
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_concurrent_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("code_registry");
    group.throughput(Throughput::Elements(100));

    let registry = prefilled(1000);
    let rt = tokio::runtime::Runtime::new().unwrap();

    group.bench_function("concurrent_100_mixed", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut handles = Vec::new();
                for i in 0..100 {
                    let reg = registry.clone();
                    handles.push(tokio::spawn(async move {
                        let code = format!("code-{:05}", i % 1000);
                        if i % 4 == 0 {
                            reg.put(code, "10.0.0.9", "203.0.113.9");
                        } else {
                            let _ = reg.get(&code);
                        }
                    }));
                }
                for handle in handles {
                    let _ = handle.await;
                }
            });
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_put,
    bench_get,
    bench_evict_expired,
    bench_concurrent_access,
);
criterion_main!(benches);
