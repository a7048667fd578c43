//! Throughput Benchmark for basex-client
//!
//! Measures reply decoding, request encoding and a full session round
//! without a socket.

use basex_client::protocol::{encode, Arg, FrameDecoder};
use basex_client::{Config, Flow, Session, Transport};
use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

/// Escapes `text` and terminates it, as the server does.
fn server_text(text: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(text.len() + 1);
    for &b in text {
        if b == 0x00 || b == 0xFF {
            out.extend_from_slice(&[0xFF]);
        }
        out.extend_from_slice(&[b]);
    }
    out.extend_from_slice(&[0x00]);
    out.freeze()
}

/// Benchmark text decoding
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    let plain = server_text(&b"<item>value</item>".repeat(4096));
    group.throughput(Throughput::Bytes(plain.len() as u64));
    group.bench_function("whole_buffer", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.push(plain.clone());
            black_box(decoder.try_read_string());
        });
    });

    group.bench_function("4k_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            let mut rest = plain.clone();
            while !rest.is_empty() {
                let chunk = rest.split_to(rest.len().min(4096));
                decoder.push(chunk);
            }
            black_box(decoder.try_read_string());
        });
    });

    let small = server_text(&b"x".repeat(4096));
    group.throughput(Throughput::Bytes(small.len() as u64));
    group.bench_function("1_byte_chunks", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            for i in 0..small.len() {
                decoder.push(small.slice(i..i + 1));
            }
            black_box(decoder.try_read_string());
        });
    });

    // every other byte needs an escape
    let binary: Vec<u8> = (0..64 * 1024).map(|i| if i % 2 == 0 { 0x00 } else { b'a' }).collect();
    let escaped = server_text(&binary);
    group.throughput(Throughput::Bytes(escaped.len() as u64));
    group.bench_function("escape_heavy", |b| {
        b.iter(|| {
            let mut decoder = FrameDecoder::new();
            decoder.push(escaped.clone());
            black_box(decoder.try_read_string());
        });
    });

    group.finish();
}

/// Benchmark request encoding
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));

    group.bench_function("command", |b| {
        b.iter(|| black_box(encode(&[Arg::text("xquery for $i in 1 to 10 return $i")])));
    });

    group.bench_function("bind", |b| {
        b.iter(|| {
            black_box(encode(&[
                Arg::Byte(3),
                Arg::text("query1"),
                Arg::text("name"),
                Arg::text("value"),
                Arg::text("xs:string"),
            ]))
        });
    });

    let large = "x".repeat(64 * 1024);
    group.bench_function("command_64k", |b| {
        b.iter(|| black_box(encode(&[Arg::text(large.as_str())])));
    });

    group.finish();
}

struct Discard;

impl Transport for Discard {
    fn write(&mut self, frame: Bytes) -> Flow {
        black_box(frame);
        Flow::Ready
    }
}

/// Benchmark full command round trips through a session
fn bench_session(c: &mut Criterion) {
    let mut session = Session::new(&Config::default(), Discard);
    session.connected();
    session.receive(Bytes::from_static(b"nonce\x00"));
    session.receive(Bytes::from_static(b"\x00"));

    let reply = Bytes::from_static(b"result\x00Query executed in 0.05 ms.\x00\x00");

    let mut group = c.benchmark_group("session");
    group.throughput(Throughput::Elements(1));

    group.bench_function("command_round_trip", |b| {
        b.iter(|| {
            session.execute_command("xquery 1", |output| {
                black_box(output.ok());
            });
            session.receive(reply.clone());
        });
    });

    group.bench_function("queued_commands", |b| {
        b.iter(|| {
            for _ in 0..16 {
                session.execute_command("xquery 1", |_| {});
            }
            for _ in 0..16 {
                session.receive(reply.clone());
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_decode, bench_encode, bench_session);

criterion_main!(benches);
