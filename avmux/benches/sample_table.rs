use avmux::index::{IndexBuilder, IndexCursor, QtIndex, TrackIndex};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

const SAMPLES: u64 = 100_000;

fn build() -> IndexBuilder {
    let mut builder = IndexBuilder::new();
    let mut offset = 0;
    for i in 0..SAMPLES {
        let size = 1000 + (i % 7) as u32 * 100;
        builder.add_sample(offset, size, i % 30 == 0, i as i64 * 1001, 1001);
        // interleaved audio breaks up the chunks
        offset += size as u64 + if i % 5 == 0 { 6400 } else { 0 };
    }
    builder
}

fn criterion_benchmark(c: &mut Criterion) {
    let index = TrackIndex::Qt(QtIndex::new(build().finalize(false), None));

    let mut group = c.benchmark_group("sample_table");
    group.bench_function("build", |b| b.iter(|| build().finalize(false)));
    group.bench_function("sequential_locate", |b| {
        b.iter(|| {
            let mut cursor = IndexCursor::default();
            for sample in 0..SAMPLES {
                black_box(index.locate(sample, &mut cursor));
            }
        })
    });
    group.bench_function("random_locate", |b| {
        b.iter(|| {
            let mut cursor = IndexCursor::default();
            let mut sample = 1;
            for _ in 0..1000 {
                sample = sample * 7919 % SAMPLES;
                black_box(index.locate(sample, &mut cursor));
                black_box(index.presentation_time(sample, &mut cursor));
            }
        })
    });
    group.bench_function("time_to_sample", |b| {
        b.iter(|| {
            let mut cursor = IndexCursor::default();
            for time in (0..SAMPLES * 1001).step_by(100_003) {
                black_box(index.time_to_sample(time, &mut cursor));
            }
        })
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
