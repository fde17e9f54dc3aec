//! Benchmarks for remote-catalog
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn benchmark_line_parsing(c: &mut Criterion) {
    use remote_catalog::db::parse_listing_line;

    c.bench_function("parse_listing_line", |b| {
        let line = "   48213 2024-03-17 09:12:44.123456789 seagate/Photos/2024/IMG 0042.HEIC";

        b.iter(|| {
            let record = parse_listing_line(black_box(line)).unwrap();
            black_box(record);
        })
    });
}

fn benchmark_classification(c: &mut Criterion) {
    use remote_catalog::db::classify_ext;

    c.bench_function("classify_ext", |b| {
        let paths = [
            "seagate/Photos/a.jpg",
            "seagate/Videos/clip.MOV",
            "seagate/Docs/notes.txt",
            "seagate/Photos/README",
        ];

        b.iter(|| {
            for path in &paths {
                black_box(classify_ext(black_box(path)));
            }
        })
    });
}

fn benchmark_chunk_keys(c: &mut Criterion) {
    use remote_catalog::chunk::ChunkRef;

    c.bench_function("chunk_key_parse", |b| {
        b.iter(|| {
            let chunk: ChunkRef = black_box("seagate/Photos/#3/8").parse().unwrap();
            black_box(chunk.artifact_stem());
        })
    });
}

criterion_group!(
    benches,
    benchmark_line_parsing,
    benchmark_classification,
    benchmark_chunk_keys
);
criterion_main!(benches);
