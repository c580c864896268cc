//! Benchmarks for the CPU-bound search hot paths.
//!
//! The recency boost is required to stay sub-millisecond for result lists
//! of ~100 entries; fusion runs on every hybrid query.

use std::hint::black_box;

use codeseek::core::{Chunk, ChunkType, RecencyConfig, SearchResult};
use codeseek::{apply_recency_boost, fuse_rrf, fuse_weighted};
use criterion::{Criterion, criterion_group, criterion_main};

fn make_results(count: usize, mtime_base: i64) -> Vec<SearchResult> {
    (0..count)
        .map(|index| {
            let chunk = Chunk::new(
                format!("src/file_{index}.rs"),
                ChunkType::Function,
                format!("function_{index}"),
                format!("fn function_{index}() {{ body(); }}"),
                1,
                10,
            )
            .with_file_mtime(mtime_base - (index as i64) * 86_400);
            SearchResult::new(chunk, 1.0 - index as f32 * 0.005)
        })
        .collect()
}

fn bench_recency(c: &mut Criterion) {
    let now = 1_750_000_000i64;
    let results = make_results(100, now);
    let config = RecencyConfig::new(0.25, 30.0);

    c.bench_function("recency_boost_100", |b| {
        b.iter_batched(
            || results.clone(),
            |mut batch| {
                apply_recency_boost(black_box(&mut batch), black_box(&config), black_box(now));
                batch
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_fusion(c: &mut Criterion) {
    let dense = make_results(100, 1_750_000_000);
    let mut lexical = make_results(100, 1_750_000_000);
    lexical.reverse();

    c.bench_function("fuse_rrf_100x100", |b| {
        b.iter(|| fuse_rrf(black_box(&dense), black_box(&lexical), black_box(60)));
    });

    c.bench_function("fuse_weighted_100x100", |b| {
        b.iter(|| fuse_weighted(black_box(&dense), black_box(&lexical), black_box(0.7)));
    });
}

criterion_group!(benches, bench_recency, bench_fusion);
criterion_main!(benches);
