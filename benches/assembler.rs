//! Criterion benchmarks for the event assembly hot paths.
//!
//! Key metrics:
//! - Fragment decode throughput for typical payload sizes
//! - Merge cost per fragment for physics events of varying width
//! - Serialization cost of a complete event
//!
//! Run with: cargo bench --bench assembler

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_evb::assembler::{EventAssembler, FragmentDecoder};
use rust_evb::config::BuilderConfig;
use rust_evb::format::{EventTag, Fragment};
use rust_evb::serializer::EventSerializer;

fn fragment(source_id: u32, event_id: u64, payload: usize) -> Fragment {
    Fragment::new(EventTag::Physics.as_u8(), source_id, event_id, 1, vec![0u8; payload])
}

/// Decode throughput, including the corrupted fallback path.
fn decode_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragment_decode");

    for size in [64usize, 1024, 16 * 1024] {
        let raw = fragment(0, 1, size).to_bytes();
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new("valid", size), &raw, |b, raw| {
            b.iter(|| FragmentDecoder.decode(0, black_box(raw.clone()), 0));
        });
    }

    let truncated: Bytes = fragment(0, 1, 1024).to_bytes().slice(..512);
    group.bench_function("truncated", |b| {
        b.iter(|| FragmentDecoder.decode(0, black_box(truncated.clone()), 0));
    });

    group.finish();
}

/// Full merge and drain of one event per iteration.
fn merge_events(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for channels in [2usize, 8, 32] {
        let payload = Bytes::from(vec![0u8; 256]);
        let mut assembler = EventAssembler::new(&BuilderConfig::with_channels(channels));
        assembler.start(1, 0).unwrap();
        let mut event_id = 0u64;

        group.throughput(Throughput::Elements(channels as u64));
        group.bench_with_input(BenchmarkId::new("physics", channels), &channels, |b, &channels| {
            b.iter(|| {
                event_id += 1;
                for source_id in 0..channels as u32 {
                    let f = Fragment::new(0, source_id, event_id, 1, payload.clone());
                    assembler.merge(f, 0);
                }
                black_box(assembler.take_ready(EventTag::Physics))
            });
        });
    }

    group.finish();
}

fn serialize_event(c: &mut Criterion) {
    let mut assembler = EventAssembler::new(&BuilderConfig::with_channels(8));
    assembler.start(1, 0).unwrap();
    for s in 0..8 {
        assembler.merge(fragment(s, 1, 1024), 0);
    }
    let event = assembler.take_ready(EventTag::Physics).remove(0);

    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Bytes(event.payload_size() as u64));
    group.bench_function("physics_8x1k", |b| {
        b.iter(|| EventSerializer.serialize(black_box(&event)));
    });
    group.finish();
}

criterion_group!(benches, decode_throughput, merge_events, serialize_event);
criterion_main!(benches);
