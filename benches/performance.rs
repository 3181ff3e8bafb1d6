#![allow(missing_docs)]

use archivist::{Archivist, Format, Serializable};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::hint::black_box;
use std::rc::Rc;

#[derive(Clone, Default, Serialize, Deserialize, Serializable, Debug)]
struct BenchItem {
    id: u64,
    payload: Vec<u64>,
}

#[derive(Clone, Default, Serialize, Deserialize, Serializable, Debug)]
struct BenchCollection {
    data: Vec<BenchItem>,
}

fn generate_data(count: usize) -> BenchCollection {
    let items = (0..count)
        .map(|i| BenchItem {
            id: i as u64,
            payload: vec![i as u64; 128], // ~1KB
        })
        .collect();
    BenchCollection { data: items }
}

// --- BENCHMARKS ---

fn bench_writers(c: &mut Criterion) {
    let item_count = 10_000;
    let mut data = generate_data(item_count);

    let mut group = c.benchmark_group("Serialization Write");
    group.throughput(Throughput::Bytes((item_count * 1032) as u64));

    // 1. Baseline: Bincode
    group.bench_function("bincode_serialize", |b| {
        let mut buffer = Vec::new();
        b.iter(|| {
            buffer.clear();
            bincode::serde::encode_into_std_write(black_box(&data), &mut buffer, bincode::config::standard())
                .expect("Bincode serialization failed");
        });
    });

    // 2. Archivist, one per format
    for format in [Format::Binary, Format::PortableBinary, Format::Tree] {
        let archiver = Archivist::builder().format(format).compact().build();
        group.bench_function(format!("archivist_{format}"), |b| {
            let mut buffer = Vec::new();
            b.iter(|| {
                buffer.clear();
                archiver
                    .write(&mut buffer, black_box(&mut data))
                    .expect("Archivist serialization failed");
            });
        });
    }

    group.finish();
}

fn bench_readers(c: &mut Criterion) {
    let item_count = 10_000;
    let mut data = generate_data(item_count);

    let bincode_buffer =
        bincode::serde::encode_to_vec(&data, bincode::config::standard()).expect("Bincode serialization failed");

    let mut group = c.benchmark_group("Serialization Read");
    group.throughput(Throughput::Bytes((item_count * 1032) as u64));

    group.bench_function("bincode_deserialize", |b| {
        b.iter(|| {
            let (decoded, _): (BenchCollection, usize) =
                bincode::serde::decode_from_slice(black_box(&bincode_buffer), bincode::config::standard())
                    .expect("Bincode deserialization failed");
            black_box(decoded);
        });
    });

    for format in [Format::Binary, Format::PortableBinary, Format::Tree] {
        let archiver = Archivist::builder().format(format).compact().build();
        let bytes = archiver.to_bytes(&mut data).expect("Archivist serialization failed");
        group.bench_function(format!("archivist_{format}"), |b| {
            b.iter(|| {
                let decoded: BenchCollection =
                    archiver.from_bytes(black_box(&bytes)).expect("Archivist deserialization failed");
                black_box(decoded);
            });
        });
    }

    group.finish();
}

fn bench_shared_graph(c: &mut Criterion) {
    let node_count = 10_000;
    let shared = Rc::new(RefCell::new(BenchItem { id: 7, payload: vec![7; 16] }));
    // Every pointer refers to the same pointee; only the first carries the payload.
    let mut pointers: Vec<Rc<RefCell<BenchItem>>> = (0..node_count).map(|_| Rc::clone(&shared)).collect();

    let mut group = c.benchmark_group("Shared Pointers");
    group.throughput(Throughput::Elements(node_count as u64));

    group.bench_function("archivist_tracking", |b| {
        let mut buffer = Vec::new();
        b.iter(|| {
            buffer.clear();
            Archivist::write(&mut buffer, black_box(&mut pointers)).expect("Archivist serialization failed");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_writers, bench_readers, bench_shared_graph);
criterion_main!(benches);
