//! Benchmarks for inbound framing, line parsing and outbound encoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use slirc_engine::{FrameCodec, IrcLine, Tags};

/// Simple PING line
const SIMPLE_LINE: &str = "PING :irc.example.com";

/// Channel message with a user source
const PRIVMSG_LINE: &str = ":nick!user@host PRIVMSG #channel :Hello, world!";

/// Message with IRCv3 tags
const TAGGED_LINE: &str = "@time=2023-01-01T00:00:00.000Z;msgid=abc123;+example/tag=value :nick!user@host PRIVMSG #channel :Hello with tags!";

/// Names reply with prefixed members
const NAMES_LINE: &str = ":irc.server.net 353 bot = #channel :@alice +bob carol dave!d@host erin frank";

fn burst(lines: usize) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..lines {
        let line = match i % 4 {
            0 => SIMPLE_LINE,
            1 => PRIVMSG_LINE,
            2 => TAGGED_LINE,
            _ => NAMES_LINE,
        };
        stream.extend_from_slice(line.as_bytes());
        stream.extend_from_slice(b"\r\n");
    }
    stream
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Framing");

    for lines in [1usize, 16, 256] {
        let stream = burst(lines);
        group.throughput(Throughput::Bytes(stream.len() as u64));
        group.bench_with_input(BenchmarkId::new("whole", lines), &stream, |b, stream| {
            b.iter(|| {
                let mut codec = FrameCodec::default();
                black_box(codec.feed(black_box(stream)))
            })
        });
        group.bench_with_input(BenchmarkId::new("chunked_64", lines), &stream, |b, stream| {
            b.iter(|| {
                let mut codec = FrameCodec::default();
                let mut count = 0;
                for chunk in stream.chunks(64) {
                    count += codec.feed(black_box(chunk)).len();
                }
                black_box(count)
            })
        });
    }

    group.bench_function("fallback_decode", |b| {
        let codec = FrameCodec::default();
        b.iter(|| black_box(codec.decode_line(black_box(b"PRIVMSG #c :caf\xe9 au lait"))))
    });

    group.finish();
}

fn benchmark_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Line Parsing");

    for (name, line) in [
        ("simple", SIMPLE_LINE),
        ("privmsg", PRIVMSG_LINE),
        ("tagged", TAGGED_LINE),
        ("names", NAMES_LINE),
    ] {
        group.bench_with_input(BenchmarkId::new("parse", name), line, |b, line| {
            b.iter(|| black_box(IrcLine::parse(black_box(line))))
        });
    }

    group.bench_function("tags_unescaped", |b| {
        let line = IrcLine::parse(TAGGED_LINE).unwrap();
        b.iter(|| black_box(black_box(&line).tags()))
    });

    group.finish();
}

fn benchmark_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("Outbound Encoding");
    let codec = FrameCodec::default();
    let long = "x".repeat(1024);
    let tags = Tags::new()
        .with("+draft/reply", Some("abc123"))
        .with("label", Some("a b;c"));

    group.bench_function("short", |b| {
        b.iter(|| black_box(codec.encode_line(black_box(PRIVMSG_LINE))))
    });
    group.bench_function("truncated", |b| {
        b.iter(|| black_box(codec.encode_line(black_box(&long))))
    });
    group.bench_function("tag_prefix", |b| {
        b.iter(|| black_box(black_box(&tags).to_prefix()))
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_framing,
    benchmark_parsing,
    benchmark_encoding,
);

criterion_main!(benches);
