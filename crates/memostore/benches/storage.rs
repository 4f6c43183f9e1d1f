use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use memostore::{CacheEntry, DurableTier, Metadata, DEFAULT_MAX_BYTES};
use tempfile::TempDir;

fn entry(key: String, data: &[u8]) -> CacheEntry {
    CacheEntry::new(key, data.to_vec(), Utc::now(), None, vec![], Metadata::new())
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let tier = DurableTier::open(dir.path(), DEFAULT_MAX_BYTES).unwrap();
        let data = vec![b'x'; 1024];

        let mut counter = 0u64;
        b.iter(|| {
            black_box(tier.put(&entry(format!("k{}", counter % 100), &data), Utc::now()).unwrap());
            counter += 1;
        });
    });
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_1kb", |b| {
        let dir = TempDir::new().unwrap();
        let tier = DurableTier::open(dir.path(), DEFAULT_MAX_BYTES).unwrap();
        let data = vec![b'x'; 1024];

        // Pre-populate with 100 entries
        for i in 0..100 {
            tier.put(&entry(format!("k{i}"), &data), Utc::now()).unwrap();
        }

        b.iter(|| {
            black_box(tier.get("k50", Utc::now()));
        });
    });
    group.finish();
}

fn bench_eviction_pressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("evict");
    group.sample_size(50);
    group.throughput(Throughput::Elements(1));

    group.bench_function("put_1kb_at_cap", |b| {
        let dir = TempDir::new().unwrap();
        // Room for 64 entries, so every put past warm-up evicts one
        let tier = DurableTier::open(dir.path(), 64 * 1024).unwrap();
        let data = vec![b'x'; 1024];

        let mut counter = 0u64;
        b.iter(|| {
            black_box(tier.put(&entry(format!("k{counter}"), &data), Utc::now()).ok());
            counter += 1;
        });
    });
    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_eviction_pressure);
criterion_main!(benches);
