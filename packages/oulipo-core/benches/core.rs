use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use oulipo_core::{Identifier, InvariantSpan, Op, StreamElement, VariantSpan, VariantStream};

const COUNTS: &[u64] = &[100, 1_000, 10_000];

fn home() -> Identifier {
    Identifier::new("ted://1.999.0.1.0.1.1.1")
}

fn stream_of(count: u64) -> VariantStream {
    let elements = (0..count)
        .map(|i| {
            StreamElement::InvariantSpan(
                InvariantSpan::new(i * 10 + 1, 10, home()).expect("valid span"),
            )
        })
        .collect();
    VariantStream::from_elements(home(), elements).expect("valid elements")
}

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("put-append");
    for &count in COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut stream = VariantStream::new(home());
                for i in 0..count {
                    let span = InvariantSpan::new(i * 3 + 1, 3, home()).expect("valid span");
                    stream
                        .put(i * 3 + 1, StreamElement::InvariantSpan(span))
                        .expect("put");
                }
                black_box(stream.character_count())
            })
        });
    }
    group.finish();
}

fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index");
    for &count in COUNTS {
        let stream = stream_of(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &stream, |b, stream| {
            b.iter(|| {
                let mut pos = 1;
                while pos <= stream.character_count() {
                    black_box(stream.index(pos).expect("index"));
                    pos += 97;
                }
            })
        });
    }
    group.finish();
}

fn bench_move(c: &mut Criterion) {
    let mut group = c.benchmark_group("move-middle-to-front");
    for &count in COUNTS {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter_batched(
                || stream_of(count),
                |mut stream| {
                    let span = VariantSpan::new(count * 5 + 3, 15).expect("valid span");
                    stream.move_span(1, span).expect("move");
                    black_box(stream)
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_op_codec(c: &mut Criterion) {
    let ops: Vec<Op> = (1..=1_000u64)
        .map(|i| Op::Move {
            to: i,
            span: VariantSpan::new(i, 3).expect("valid span"),
        })
        .collect();
    c.bench_function("op-encode-decode-1000", |b| {
        b.iter(|| {
            for op in &ops {
                let bytes = op.encode().expect("encode");
                black_box(Op::decode(&bytes).expect("decode"));
            }
        })
    });
}

criterion_group!(benches, bench_put, bench_index, bench_move, bench_op_codec);
criterion_main!(benches);
