//! Session Performance Benchmarks for CrabStream
//!
//! Run with: cargo bench --bench session_benchmarks
//!
//! These benchmarks cover the per-packet and per-message hot paths:
//! capture handoff, timestamp conversion and control message encoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use crabstream::testing::{synthetic_video_sample, SyntheticStreamProfile};
use crabstream::timing::ns_to_ticks;
use crabstream::webrtc::bridge::{BridgeSlot, MediaBridges};
use crabstream::webrtc::ingest::SampleIngest;
use crabstream::webrtc::packet::MediaKind;
use crabstream::webrtc::protocol::{ControlMessage, SystemAction};
use crabstream::webrtc::scheduler::TaskSubmitter;
use serde_json::json;
use std::time::Duration;

fn bench_sample_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("Sample Ingest");
    group.measurement_time(Duration::from_secs(5));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("runtime");
    let slot = BridgeSlot::new();
    let bridges = MediaBridges::new();
    slot.install(bridges.clone());
    let ingest = SampleIngest::new(slot, TaskSubmitter::new(runtime.handle().clone()));

    let profile = SyntheticStreamProfile::hd_60fps();
    let sample = synthetic_video_sample(&profile, 1);

    group.throughput(Throughput::Elements(1));
    group.bench_function("video_sample_to_bridge", |b| {
        b.iter(|| {
            ingest.ingest(black_box(&sample), MediaKind::Video);
            black_box(bridges.video.try_get())
        })
    });

    group.bench_function("video_sample_overwrite", |b| {
        b.iter(|| ingest.ingest(black_box(&sample), MediaKind::Video))
    });

    group.finish();
}

fn bench_timestamp_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("Timestamp Conversion");

    for rate in [48_000u32, 90_000] {
        group.bench_with_input(BenchmarkId::from_parameter(rate), &rate, |b, &rate| {
            b.iter(|| ns_to_ticks(black_box(1_234_567_890_123), rate))
        });
    }

    group.finish();
}

fn bench_control_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("Control Message Encoding");

    let cursor = ControlMessage::Cursor(json!({
        "curdata": "iVBORw0KGgoAAAANSUhEUgAAACAAAAAgCAYAAABzenr0AAAA",
        "handle": 65541,
        "hotspot": {"x": 4, "y": 4},
        "override": null
    }));
    group.bench_function("cursor", |b| b.iter(|| black_box(&cursor).encode()));

    let system = ControlMessage::system(SystemAction::VideoBitrate(8000));
    group.bench_function("system", |b| b.iter(|| black_box(&system).encode()));

    for (size, label) in [(1024usize, "1KB"), (16 * 1024, "16KB"), (48 * 1024, "48KB")] {
        let text = "c".repeat(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("clipboard", label), &text, |b, text| {
            b.iter(|| ControlMessage::clipboard(black_box(text)).map(|m| m.encode()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sample_ingest,
    bench_timestamp_conversion,
    bench_control_encoding
);
criterion_main!(benches);
