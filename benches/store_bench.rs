//! Throughput benchmarks for the EmberKV store.
//!
//! Measures the core keyspace operations under a few representative
//! workloads. The reaper is disabled so the numbers reflect the hot path
//! alone.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use emberkv::{Config, Context, Scalar, Store};
use std::time::Duration;

fn bench_store(shards: usize) -> Store {
    Store::new(
        Config::default()
            .with_shard_count(shards)
            .with_cleanup_interval(Duration::ZERO),
    )
    .unwrap()
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store
                .set(&ctx, &format!("key:{}", i), "small_value", 0)
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut i = 0u64;
        let value = "x".repeat(1024); // 1KB value
        b.iter(|| {
            store
                .set(&ctx, &format!("key:{}", i), value.clone(), 0)
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            store
                .set(&ctx, &format!("ttl:{}", i), "value", 60)
                .unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    // Pre-populate with data
    for i in 0..100_000 {
        store
            .set(&ctx, &format!("key:{}", i), format!("value:{}", i), 0)
            .unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&ctx, &format!("key:{}", i % 100_000)).ok());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            black_box(store.get(&ctx, &format!("missing:{}", i)).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark counter operations
fn bench_incr(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));

    group.bench_function("incr_single_key", |b| {
        b.iter(|| {
            black_box(store.incr(&ctx, "counter").unwrap());
        });
    });

    group.finish();
}

/// Benchmark list push/pop
fn bench_lists(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    let mut group = c.benchmark_group("lists");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush_then_lpop", |b| {
        b.iter(|| {
            store
                .rpush(&ctx, "queue", vec![Scalar::from("job")])
                .unwrap();
            black_box(store.lpop(&ctx, "queue").unwrap());
        });
    });

    group.finish();
}

/// Benchmark mixed workload (80% reads, 20% writes)
fn bench_mixed(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    // Pre-populate
    for i in 0..10_000 {
        store
            .set(&ctx, &format!("key:{}", i), format!("value:{}", i), 0)
            .unwrap();
    }

    let mut group = c.benchmark_group("mixed");
    group.throughput(Throughput::Elements(1));

    group.bench_function("80_read_20_write", |b| {
        let mut i = 0u64;
        b.iter(|| {
            if i % 5 == 0 {
                // 20% writes
                store.set(&ctx, &format!("new:{}", i), "value", 0).unwrap();
            } else {
                // 80% reads
                black_box(store.get(&ctx, &format!("key:{}", i % 10_000)).ok());
            }
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark transaction commit overhead
fn bench_transactions(c: &mut Criterion) {
    let store = bench_store(16);
    let ctx = Context::background();

    let mut group = c.benchmark_group("transactions");
    group.throughput(Throughput::Elements(1));

    group.bench_function("buffered_set_commit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let tx = store.transaction();
            tx.set(&ctx, &format!("tx:{}", i), "value", 0).unwrap();
            tx.commit().unwrap();
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_incr,
    bench_lists,
    bench_mixed,
    bench_transactions
);
criterion_main!(benches);
