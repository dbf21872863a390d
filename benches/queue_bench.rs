//! Benchmarks for tidelog queue operations

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tempfile::TempDir;
use tidelog::time::SetTimeProvider;
use tidelog::{Config, Queue, RollCycle, ScanResult};

const RECORDS: u64 = 10_000;

fn setup_queue(dir: &TempDir) -> Queue {
    let config = Config::builder()
        .data_dir(dir.path())
        .roll_cycle(RollCycle::DAILY)
        .segment_size(64 * 1024 * 1024)
        .time_provider(Arc::new(SetTimeProvider::new(1_523_498_933_145)))
        .build();
    Queue::open(config).unwrap()
}

fn append_benchmarks(c: &mut Criterion) {
    let payload = vec![0xABu8; 128];
    let mut group = c.benchmark_group("append");
    group.throughput(Throughput::Elements(RECORDS));

    group.bench_function("write_bytes_128b", |b| {
        b.iter_batched(
            || TempDir::new().unwrap(),
            |dir| {
                let queue = setup_queue(&dir);
                let mut appender = queue.acquire_appender().unwrap();
                for _ in 0..RECORDS {
                    black_box(appender.write_bytes(&payload).unwrap());
                }
            },
            BatchSize::PerIteration,
        )
    });
    group.finish();
}

fn read_benchmarks(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let queue = setup_queue(&dir);
    let mut appender = queue.acquire_appender().unwrap();
    let mut indexes = Vec::with_capacity(RECORDS as usize);
    for i in 0..RECORDS {
        indexes.push(appender.write_bytes(&i.to_le_bytes()).unwrap());
    }

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(RECORDS));

    group.bench_function("sequential", |b| {
        b.iter(|| {
            let mut tailer = queue.create_tailer();
            let mut count = 0u64;
            while tailer.next_index().unwrap() {
                count += 1;
            }
            assert_eq!(count, RECORDS);
        })
    });

    group.bench_function("random_move_to_index", |b| {
        let mut tailer = queue.create_tailer();
        // Fixed stride over the indexes: deterministic and cache-unfriendly
        b.iter(|| {
            let mut i = 0usize;
            for _ in 0..RECORDS {
                i = (i + 7_919) % indexes.len();
                let result = tailer.move_to_index(indexes[i]).unwrap();
                assert!(matches!(result, ScanResult::Found { .. }));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, append_benchmarks, read_benchmarks);
criterion_main!(benches);
