//! Criterion benchmarks for the per-sample hot paths.
//!
//! Run: cargo bench -p decoder --bench repack
//!
//!   dop_planar_*       DSF block-group repack into DoP words
//!   dop_interleaved_*  DSDIFF byte-pair repack into DoP words
//!   sample_table_*     `stsc`/`stco` walk for tracks of varying length

#![allow(
    clippy::unwrap_used,              // benchmark helpers use unwrap for brevity
    clippy::expect_used,
    clippy::panic,
    clippy::cast_possible_truncation, // fixture bytes are taken modulo 256
    clippy::arithmetic_side_effects,
    missing_docs,                     // criterion_group! macro generates undocumented items
)]

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use decoder::engine::dsd::{DopMarker, repack_interleaved, repack_planar};
use decoder::mp4::sample_table::{ChunkRun, SampleSizes, SampleTable};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn dsd_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

/// Sample table inputs for `samples` AAC access units, 4 per chunk.
fn table_inputs(samples: u32) -> (SampleSizes, Vec<ChunkRun>, Vec<u64>) {
    let sizes = SampleSizes::Table((0..samples).map(|i| 300 + i % 64).collect());
    let runs = vec![ChunkRun {
        first_chunk: 1,
        samples_per_chunk: 4,
    }];
    let chunks = samples.div_ceil(4);
    let offsets = (0..u64::from(chunks)).map(|c| 4_096 + c * 1_400).collect();
    (sizes, runs, offsets)
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_dop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dop");
    for block in [4_096usize, 16_384] {
        let left = dsd_bytes(block, 1);
        let right = dsd_bytes(block, 2);
        let interleaved: Vec<u8> = left.iter().zip(&right).flat_map(|(&l, &r)| [l, r]).collect();
        let mut out = vec![0i32; block];
        group.throughput(Throughput::Bytes((block * 2) as u64));

        group.bench_with_input(BenchmarkId::new("planar", block), &block, |b, _| {
            b.iter(|| {
                let mut marker = DopMarker::new();
                black_box(repack_planar(black_box(&left), black_box(&right), &mut out, &mut marker))
            });
        });
        group.bench_with_input(BenchmarkId::new("interleaved", block), &block, |b, _| {
            b.iter(|| {
                let mut marker = DopMarker::new();
                black_box(repack_interleaved(black_box(&interleaved), &mut out, &mut marker))
            });
        });
    }
    group.finish();
}

fn bench_sample_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("sample_table");
    // Roughly 1, 10 and 60 minutes of 44.1 kHz AAC.
    for samples in [2_600u32, 26_000, 155_000] {
        let (sizes, runs, offsets) = table_inputs(samples);
        group.bench_with_input(BenchmarkId::new("build", samples), &samples, |b, _| {
            b.iter(|| SampleTable::build(black_box(&sizes), black_box(&runs), black_box(&offsets)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dop, bench_sample_table);
criterion_main!(benches);
