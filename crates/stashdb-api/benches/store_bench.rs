use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use stashdb::{GetManyOptions, ObjectStore, StoreConfig, SyncMode, TextEncoding};
use tempfile::TempDir;

fn config(batch_size: usize) -> StoreConfig {
    StoreConfig::default()
        .with_key_encoding(TextEncoding::Utf8)
        .with_batch_size(batch_size)
        .with_map_size(64 * 1024 * 1024)
        .with_sync_mode(SyncMode::None)
}

fn open(batch_size: usize) -> (TempDir, ObjectStore) {
    let dir = TempDir::new().unwrap();
    let store = ObjectStore::open(dir.path(), config(batch_size)).unwrap();
    (dir, store)
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(10);
    for batch_size in [1usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("buffered_1k", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter_batched(
                    || open(batch_size),
                    |(_dir, store)| {
                        for i in 0..1000u32 {
                            store.put(&format!("key:{}", i), &i).unwrap();
                        }
                        store.flush().unwrap();
                    },
                    BatchSize::PerIteration,
                );
            },
        );
    }
    group.bench_function("put_many_1k", |b| {
        b.iter_batched(
            || open(1000),
            |(_dir, store)| {
                store
                    .put_many((0..1000u32).map(|i| (format!("key:{}", i), i)))
                    .unwrap();
            },
            BatchSize::PerIteration,
        );
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let (_dir, store) = open(1000);
    store
        .put_many((0..10_000u32).map(|i| (format!("key:{}", i), i)))
        .unwrap();

    let mut group = c.benchmark_group("get");
    group.bench_function("stored_hit", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            let value: Option<u32> = store.get(&format!("key:{}", i)).unwrap();
            black_box(value)
        });
    });
    group.bench_function("miss", |b| {
        b.iter(|| {
            let value: Option<u32> = store.get("absent").unwrap();
            black_box(value)
        });
    });
    group.bench_function("get_many_100", |b| {
        let keys: Vec<String> = (0..100).map(|i| format!("key:{}", i * 37)).collect();
        b.iter(|| {
            let many = store
                .get_many::<_, _, u32>(keys.iter(), GetManyOptions::default())
                .unwrap();
            black_box(many.found.len())
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get);
criterion_main!(benches);
