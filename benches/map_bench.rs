//! Put and lookup throughput for each map variant

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use longlongmap::{LongLongMap, LongMap, MapConfig, MapKind, StorageKind};
use tempfile::TempDir;

const ENTRIES: i64 = 100_000;
const STRIDE: i64 = 3;

fn configs(dir: &TempDir) -> Vec<(&'static str, MapConfig)> {
    vec![
        ("sorted-table-ram", MapConfig::new(MapKind::SortedTable)),
        ("sparse-array-ram", MapConfig::new(MapKind::SparseArray)),
        (
            "sparse-array-mmap",
            MapConfig::new(MapKind::SparseArray)
                .with_storage(StorageKind::Mmap)
                .with_path(dir.path()),
        ),
        ("direct", MapConfig::new(MapKind::Direct).with_path(dir.path())),
    ]
}

fn filled(config: &MapConfig) -> LongLongMap {
    let mut map = LongLongMap::new(config).unwrap();
    for i in 0..ENTRIES {
        map.put(i * STRIDE, i).unwrap();
    }
    map
}

fn bench_put(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut group = c.benchmark_group("put");
    for (name, config) in configs(&dir) {
        group.bench_with_input(BenchmarkId::from_parameter(name), &config, |b, config| {
            b.iter(|| black_box(filled(config)))
        });
    }
    group.finish();
}

fn bench_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let mut group = c.benchmark_group("get");
    for (name, config) in configs(&dir) {
        let map = filled(&config);
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let mut sum = 0i64;
                for key in (0..ENTRIES * STRIDE).step_by(7) {
                    sum = sum.wrapping_add(map.get(black_box(key)));
                }
                black_box(sum)
            })
        });
    }
    group.finish();
}

fn bench_multi_get(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let keys: Vec<i64> = (0..ENTRIES).map(|i| i * STRIDE).collect();
    let mut group = c.benchmark_group("multi_get");
    for (name, config) in configs(&dir) {
        let map = filled(&config.with_parallel_threshold(1 << 12));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| black_box(map.multi_get(black_box(&keys))))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_put, bench_get, bench_multi_get);
criterion_main!(benches);
