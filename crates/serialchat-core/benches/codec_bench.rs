//! Criterion benchmarks for the SerialChat frame codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package serialchat-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serialchat_core::{decode_message, encode_message, Message, READ_BUFFER_SIZE};

fn make_message(len: usize) -> Message {
    Message::local("a".repeat(len), "bench-sender")
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for len in [16usize, 256, READ_BUFFER_SIZE - 16] {
        let msg = make_message(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg)))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for len in [16usize, 256, READ_BUFFER_SIZE - 16] {
        let bytes = encode_message(&make_message(len));
        group.bench_with_input(BenchmarkId::from_parameter(len), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
