//! # Framing Benchmark
//!
//! Every datagram is hashed twice: once when framed, once when validated.
//! These measure both paths across payload sizes, plus one time-sync slice.
//!
//! Run with: `cargo bench --package tandem_networking`

// Benchmarks don't need strict docs
#![allow(missing_docs)]

use std::net::SocketAddr;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tandem_networking::room::RoomPlayer;
use tandem_networking::{GameplayMessage, NetworkMessage, RecordingSink, TimeSyncedServerRoom};
use tandem_shared::{MessageType, PlayerId, MAX_MESSAGE_SIZE};

/// Benchmark: Frame and hash into a reused buffer.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    let mut frame = vec![0u8; MAX_MESSAGE_SIZE];

    for size in [0usize, 256, 4096, 10_000] {
        let payload = vec![0x5Au8; size];
        let mut message = NetworkMessage::with_content(MessageType::GameSync, &payload).unwrap();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(message.encode_into(&mut frame).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark: Validate magic, bounds and hash, then copy out.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for size in [0usize, 256, 4096, 10_000] {
        let payload = vec![0xA5u8; size];
        let bytes = NetworkMessage::with_content(MessageType::GameSync, &payload)
            .unwrap()
            .to_bytes()
            .unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| black_box(NetworkMessage::decode(bytes).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark: One slice with a full buffer of gameplay calls for eight players.
fn bench_time_sync_slice(c: &mut Criterion) {
    let players: Vec<RoomPlayer> = (1..=8u16)
        .map(|i| RoomPlayer::joined(PlayerId(u32::from(i)), SocketAddr::from(([127, 0, 0, 1], 9000 + i))))
        .collect();
    let call = GameplayMessage::new("move", &(3, -1)).unwrap();

    c.bench_function("time_sync_slice_32_calls", |b| {
        let sink = RecordingSink::default();
        let mut room = TimeSyncedServerRoom::new(1, 20);
        b.iter(|| {
            for _ in 0..32 {
                room.buffer(call.clone());
            }
            black_box(room.run_slice(&players, &sink));
            sink.take();
        });
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_time_sync_slice);
criterion_main!(benches);
