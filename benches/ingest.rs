/// Ingest throughput and trace parsing benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use packet_loss::{CloseFlag, GapEngine, PacketRecord, TraceParser};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::io::Cursor;

const SEGMENT: u64 = 1460;

fn create_stream(connections: u64, segments: u64) -> Vec<PacketRecord<u64>> {
    let mut records = Vec::new();

    for key in 0..connections {
        records.push(PacketRecord {
            key,
            timestamp: 0.0,
            sequence: 0,
            payload_len: 0,
            header_len: 0,
            close: CloseFlag::Open,
        });
    }

    for i in 0..segments {
        for key in 0..connections {
            records.push(PacketRecord {
                key,
                timestamp: i as f64 * 0.001,
                sequence: 1 + i * SEGMENT,
                payload_len: SEGMENT - 40,
                header_len: 40,
                close: if i + 1 == segments { CloseFlag::Closed } else { CloseFlag::Open },
            });
        }
    }

    records
}

fn bench_ingest_in_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_in_order");

    for total in [1000u64, 10000, 100000].iter() {
        let records = create_stream(10, total / 10);

        group.bench_with_input(BenchmarkId::from_parameter(total), total, |b, _| {
            b.iter(|| {
                let mut engine = GapEngine::new();
                for record in &records {
                    engine.ingest(black_box(record));
                }
                engine.open_count()
            });
        });
    }
    group.finish();
}

fn bench_ingest_reordered(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest_reordered");
    let mut rng = StdRng::seed_from_u64(7);

    for window in [4usize, 64, 1024].iter() {
        let mut records = create_stream(10, 1000);
        // shuffle within fixed windows so every chain eventually resolves
        for chunk in records[10..].chunks_mut(*window) {
            chunk.shuffle(&mut rng);
        }

        group.bench_with_input(BenchmarkId::from_parameter(window), window, |b, _| {
            b.iter(|| {
                let mut engine = GapEngine::new();
                for record in &records {
                    engine.ingest(black_box(record));
                }
                engine.pooled_count()
            });
        });
    }
    group.finish();
}

fn bench_parse_line(c: &mut Criterion) {
    let line = "17\t1523.104211\t192.168.0.18\t8000\t10.0.1.44\t57089\t0\t0\t1420\t0\t0\t40\t0\t284001\t0";

    c.bench_function("parse_line", |b| {
        b.iter(|| TraceParser::parse_line(black_box(line)))
    });

    let trace = (0..10000)
        .map(|i| {
            format!(
                "{}\t{}.0\t192.168.0.18\t8000\t10.0.1.44\t57089\t0\t0\t1420\t0\t0\t40\t0\t{}\t0\n",
                i,
                i,
                1 + i * 1460
            )
        })
        .collect::<String>();

    c.bench_function("parse_stream_10000", |b| {
        b.iter(|| TraceParser::parse_stream(Cursor::new(trace.as_bytes()), |_| true))
    });
}

criterion_group!(
    benches,
    bench_ingest_in_order,
    bench_ingest_reordered,
    bench_parse_line
);
criterion_main!(benches);
