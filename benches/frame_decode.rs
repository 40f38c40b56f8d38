//! Benchmarks for frame decoding
//!
//! Measures the per-frame cost of the dispatch loop for:
//! - A full-body frame (several subjects, every segment posed)
//! - The same frame delta-compressed against its predecessor via `Contents`
//!
//! Platform: Cross-platform, no sockets involved

use cgstream::buffer::FramedBuffer;
use cgstream::protocol::records::{
    FrameInfo, GlobalSegments, LatencyInfo, LatencySample, NO_PARENT, SegmentInfo, SegmentPose,
    SubjectInfo,
};
use cgstream::protocol::{
    DecodeContext, ObjectRecord, ObjectTag, decode_frame, encode_objects, records::Contents,
};
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Instant;

const SUBJECTS: u32 = 4;
const SEGMENTS: u32 = 24;

fn subjects() -> Vec<ObjectRecord> {
    (0..SUBJECTS)
        .map(|subject_id| {
            let segments = (0..SEGMENTS)
                .map(|segment_id| SegmentInfo {
                    segment_id,
                    parent_id: if segment_id == 0 { NO_PARENT } else { segment_id - 1 },
                    name: format!("Segment{}", segment_id),
                })
                .collect();
            SubjectInfo { subject_id, name: format!("Subject{}", subject_id), segments }.into()
        })
        .collect()
}

fn poses(frame_id: u32) -> Vec<ObjectRecord> {
    let mut records: Vec<ObjectRecord> = vec![
        FrameInfo { frame_id }.into(),
        LatencyInfo { samples: vec![LatencySample { name: "Tracking".into(), seconds: 0.004 }] }
            .into(),
    ];
    records.extend((0..SUBJECTS).map(|subject_id| {
        let poses = (0..SEGMENTS)
            .map(|segment_id| SegmentPose {
                segment_id,
                translation: [segment_id as f64, frame_id as f64, 1000.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                occluded: false,
            })
            .collect();
        ObjectRecord::from(GlobalSegments { subject_id, poses })
    }));
    records
}

fn encode(records: &[ObjectRecord]) -> Vec<u8> {
    let mut buffer = FramedBuffer::new();
    encode_objects(&mut buffer, records);
    buffer.as_slice().to_vec()
}

fn bench_full_frame(c: &mut Criterion) {
    let mut records = subjects();
    records.extend(poses(1));
    let bytes = encode(&records);

    let mut group = c.benchmark_group("frame_decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("full_frame", |b| {
        b.iter(|| {
            let mut buffer = FramedBuffer::from_slice(black_box(&bytes));
            black_box(decode_frame(&mut buffer, DecodeContext::new(Instant::now())))
        });
    });

    group.finish();
}

fn bench_delta_frame(c: &mut Criterion) {
    let mut first = subjects();
    first.extend(poses(1));
    let mut buffer = FramedBuffer::from_slice(&encode(&first));
    let previous = decode_frame(&mut buffer, DecodeContext::new(Instant::now()))
        .expect("Failed to decode seed frame");
    let previous_static = previous.static_objects.expect("seed frame has statics");
    let previous_dynamic = previous.dynamic_objects.expect("seed frame has dynamics");

    let unchanged = [ObjectTag::SubjectInfo, ObjectTag::LatencyInfo].into_iter().collect();
    let mut delta: Vec<ObjectRecord> = vec![Contents { unchanged }.into()];
    delta.extend(poses(2).into_iter().filter(|r| !matches!(r, ObjectRecord::LatencyInfo(_))));
    delta.push(SubjectInfo { subject_id: 99, name: "Prop".into(), segments: vec![] }.into());
    let bytes = encode(&delta);

    let mut group = c.benchmark_group("frame_decode");
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("delta_frame", |b| {
        b.iter(|| {
            let mut buffer = FramedBuffer::from_slice(black_box(&bytes));
            let context = DecodeContext {
                previous_static: Some(&previous_static),
                previous_dynamic: Some(&previous_dynamic),
                ..DecodeContext::new(Instant::now())
            };
            black_box(decode_frame(&mut buffer, context))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_full_frame, bench_delta_frame);
criterion_main!(benches);
