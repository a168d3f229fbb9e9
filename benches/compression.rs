//! Benchmark for the compression service on columnar archive payloads

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tierkeeper::models::EventRow;
use tierkeeper::services::archival::ColumnarBatch;
use tierkeeper::services::compression::{Algorithm, CompressionService};

fn sample_payload(rows: usize) -> Vec<u8> {
    let now = Utc::now();
    let rows: Vec<EventRow> = (0..rows)
        .map(|n| EventRow {
            series: "events".to_string(),
            entity: format!("host-{}", n % 32),
            value: (n as f64).sin() * 100.0,
            recorded_at: now - Duration::seconds(n as i64),
        })
        .collect();
    serde_json::to_vec(&ColumnarBatch::from_rows("events", &rows)).unwrap()
}

fn bench_compress(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = CompressionService::new(4, 10);
    let payload = sample_payload(10_000);

    let mut group = c.benchmark_group("compress");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for algorithm in Algorithm::ALL {
        group.bench_function(format!("{:?}_10k_rows", algorithm), |b| {
            b.iter(|| {
                let bytes = black_box(payload.clone());
                rt.block_on(service.compress(bytes, Some(algorithm))).unwrap()
            });
        });
    }

    group.finish();
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = CompressionService::new(4, 10);
    let payload = sample_payload(10_000);
    let compressed = rt
        .block_on(service.compress(payload.clone(), Some(Algorithm::Zstd)))
        .unwrap();

    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("zstd_10k_rows", |b| {
        b.iter(|| {
            let bytes = black_box(compressed.bytes.clone());
            rt.block_on(service.decompress(bytes, Algorithm::Zstd)).unwrap()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_compress, bench_round_trip);
criterion_main!(benches);
