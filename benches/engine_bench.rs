use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use lsm_hybrid::{LsmTree, Options, Record};

fn record_for(key: u64) -> Record {
    Record::new(
        4,
        vec![
            (0, format!("a{key}").into_bytes()),
            (1, format!("b{key}").into_bytes()),
            (2, format!("c{key}").into_bytes()),
            (3, format!("d{key}").into_bytes()),
        ],
    )
    .unwrap()
}

fn bench_writes(c: &mut Criterion) {
    c.bench_function("write_1k_keys_with_flushes", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let tree =
                    LsmTree::open(Options::new(dir.path().join("lsm")).capacity(100)).unwrap();
                (dir, tree)
            },
            |(_dir, tree)| {
                for key in 1..=1000u64 {
                    tree.write(key, record_for(key)).unwrap();
                }
                tree.sync().unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_reads(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let tree = LsmTree::open(
        Options::new(dir.path().join("lsm"))
            .key_range(1, 2000)
            .capacity(100),
    )
    .unwrap();
    // Populate only the lower half; the upper half exercises the
    // filter-rejection fast path
    for key in 1..=1000u64 {
        tree.write(key, record_for(key)).unwrap();
    }
    tree.sync().unwrap();

    let mut key = 0u64;
    c.bench_function("read_settled_keys", |b| {
        b.iter(|| {
            key = key % 1000 + 1;
            black_box(tree.read(key, &[]).unwrap());
        })
    });

    c.bench_function("read_absent_key_rejected_by_filters", |b| {
        b.iter(|| black_box(tree.read(black_box(1500), &[]).unwrap()))
    });
}

criterion_group!(benches, bench_writes, bench_reads);
criterion_main!(benches);
