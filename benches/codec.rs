/// Benchmarks for the JSON frame codec on the inbound and outbound hot paths.
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use notebook_session_client::protocol::{EnvelopeBuilder, JsonCodec, SessionIdentity};
use notebook_session_client::ws::{Codec as _, Frame};
use serde_json::json;

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/decode");

    let exec_msg = r#"{"exec": [0, 1, 2, 3, 4, 5, 6, 7]}"#;
    let frame = Frame::Text(exec_msg.to_owned());
    group.throughput(Throughput::Bytes(exec_msg.len() as u64));
    group.bench_function("exec", |b| {
        b.iter(|| {
            JsonCodec::parse(std::hint::black_box(&frame)).expect("Decoding should succeed");
        });
    });

    let status_msg = r#"{
        "header": {
            "msg_id": "5a1b8c9e-0f64-4c56-9d7e-3b2a1c0d9e8f",
            "username": "alice",
            "session": "2b1e6c0a",
            "msg_type": "status",
            "version": "5.0",
            "date": "2026-01-01T00:00:00Z"
        },
        "parent_header": {},
        "metadata": {},
        "content": {"execution_state": "idle"},
        "buffers": [],
        "channel": "iopub"
    }"#;
    let frame = Frame::Binary(status_msg.as_bytes().to_vec());
    group.throughput(Throughput::Bytes(status_msg.len() as u64));
    group.bench_function("status", |b| {
        b.iter(|| {
            JsonCodec::parse(std::hint::black_box(&frame)).expect("Decoding should succeed");
        });
    });

    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/encode");

    let identity = SessionIdentity::new("http://localhost:8888", "2b1e6c0a", "alice")
        .expect("Identity should be valid");
    let envelopes = EnvelopeBuilder::new(Arc::new(identity));
    let codec = JsonCodec::default();

    group.bench_function("input_reply", |b| {
        b.iter(|| {
            let envelope = envelopes
                .message()
                .msg_type("input_reply")
                .content(json!({ "value": std::hint::black_box("42") }))
                .channel("stdin")
                .call();
            codec.encode(&envelope).expect("Encoding should succeed");
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode);
criterion_main!(benches);
