//! Throughput Benchmark for Gibson
//!
//! Measures the store under various workloads: plain and compressible SETs,
//! GETs, numeric adjustments, and prefix walks over a populated trie.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gibson::config::Config;
use gibson::storage::Store;

const NOW: u64 = 1_000_000;

fn bench_store() -> Store {
    Store::new(&Config::default(), NOW)
}

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut store = bench_store();
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i);
            store
                .set(key.as_bytes(), Bytes::from("small_value"), 0, NOW)
                .unwrap();
            i += 1;
        });
    });

    group.bench_function("set_medium", |b| {
        let mut store = bench_store();
        let value = Bytes::from("x".repeat(1024)); // 1KB, below the LZF floor
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i);
            store.set(key.as_bytes(), value.clone(), 0, NOW).unwrap();
            i += 1;
        });
    });

    group.bench_function("set_compressible", |b| {
        let mut store = bench_store();
        let value = Bytes::from("x".repeat(64 * 1024)); // 64KB, LZF kicks in
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i);
            store.set(key.as_bytes(), value.clone(), 0, NOW).unwrap();
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations against a populated store
fn bench_get(c: &mut Criterion) {
    let mut store = bench_store();
    for i in 0..100_000 {
        let key = format!("key:{}", i);
        let value = format!("value-{}", i);
        store
            .set(key.as_bytes(), Bytes::from(value), 0, NOW)
            .unwrap();
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_hit", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(store.get(key.as_bytes(), NOW));
            i += 1;
        });
    });

    group.bench_function("get_miss", |b| {
        b.iter(|| {
            black_box(store.get(b"missing:key", NOW));
        });
    });

    group.finish();
}

/// Benchmark INC over NUMBER items
fn bench_incr(c: &mut Criterion) {
    let mut store = bench_store();
    store.set(b"counter", Bytes::from("0"), 0, NOW).unwrap();

    let mut group = c.benchmark_group("incr");
    group.throughput(Throughput::Elements(1));
    group.bench_function("incr", |b| {
        b.iter(|| {
            black_box(store.incr(b"counter", 1, NOW).unwrap());
        });
    });
    group.finish();
}

/// Benchmark prefix walks over a trie with shared key structure
fn bench_prefix_walk(c: &mut Criterion) {
    let mut store = bench_store();
    for user in 0..100 {
        for field in 0..100 {
            let key = format!("/user/{}/field/{}", user, field);
            store
                .set(key.as_bytes(), Bytes::from("v"), 0, NOW)
                .unwrap();
        }
    }

    let mut group = c.benchmark_group("prefix");

    group.throughput(Throughput::Elements(100));
    group.bench_function("keys_one_user", |b| {
        b.iter(|| {
            black_box(store.keys(b"/user/42/", NOW).unwrap());
        });
    });

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("mcount_all_users", |b| {
        b.iter(|| {
            black_box(store.mcount(b"/user/", NOW).unwrap());
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_incr, bench_prefix_walk);
criterion_main!(benches);
