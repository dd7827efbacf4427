//! # Hash Table Benchmarks
//!
//! Point operations and full traversal over a `HashTable<U64Codec, BytesCodec>`.
//!
//! ## Benchmark Matrix
//!
//! | Group    | Variants             | Rows   |
//! |----------|----------------------|--------|
//! | put      | wal_on, wal_off      | 10,000 |
//! | get      | hit, miss            | 10,000 |
//! | iterate  | ascending, descending| 50,000 |
//!
//! Commits never fsync (`sync_on_commit(false)`), so the numbers measure the
//! index and the WAL write path, not the disk.
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench --bench hash_table
//! cargo bench --bench hash_table -- get
//! ```

use std::path::Path;
use std::sync::Arc;

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use tempfile::{tempdir, TempDir};
use turhash::{AtomicOperationsManager, BytesCodec, HashTable, StoreOptions, U64Codec};

const PUT_ROWS: u64 = 10_000;
const GET_ROWS: u64 = 10_000;
const ITER_ROWS: u64 = 50_000;
const VALUE_SIZE: usize = 64;

type Table = HashTable<U64Codec, BytesCodec>;

fn open_table(path: &Path, wal: bool) -> Table {
    let options = StoreOptions::default().wal_enabled(wal).sync_on_commit(false);
    let manager = Arc::new(AtomicOperationsManager::open(path, options).unwrap());
    HashTable::builder("bench", U64Codec, BytesCodec)
        .create(&manager)
        .unwrap()
}

fn populated(rows: u64) -> (TempDir, Table) {
    let dir = tempdir().unwrap();
    let table = open_table(dir.path(), false);
    let value = vec![7u8; VALUE_SIZE];
    for k in 0..rows {
        table.put(&k, &value).unwrap();
    }
    (dir, table)
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.throughput(Throughput::Elements(PUT_ROWS));
    group.sample_size(10);

    for (label, wal) in [("wal_on", true), ("wal_off", false)] {
        group.bench_function(BenchmarkId::new("sequential", label), |b| {
            b.iter_batched(
                || {
                    let dir = tempdir().unwrap();
                    let table = open_table(dir.path(), wal);
                    (dir, table)
                },
                |(_dir, table)| {
                    let value = vec![7u8; VALUE_SIZE];
                    for k in 0..PUT_ROWS {
                        table.put(&k, &value).unwrap();
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }

    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let (_dir, table) = populated(GET_ROWS);
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(GET_ROWS));

    group.bench_function("hit", |b| {
        b.iter(|| {
            for k in 0..GET_ROWS {
                black_box(table.get(&k).unwrap());
            }
        });
    });

    group.bench_function("miss", |b| {
        b.iter(|| {
            for k in GET_ROWS..GET_ROWS * 2 {
                black_box(table.get(&k).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_iterate(c: &mut Criterion) {
    let (_dir, table) = populated(ITER_ROWS);
    let mut group = c.benchmark_group("iterate");
    group.throughput(Throughput::Elements(ITER_ROWS));
    group.sample_size(20);

    group.bench_function("ascending", |b| {
        b.iter(|| black_box(table.iter().filter_map(|r| r.ok()).count()));
    });

    group.bench_function("descending", |b| {
        b.iter(|| black_box(table.iter_rev().filter_map(|r| r.ok()).count()));
    });

    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_iterate);
criterion_main!(benches);
