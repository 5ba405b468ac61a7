//! Benchmarks for sigil connectivity
//!
//! Measures performance of:
//! - Connected-group partitioning over blobs and scattered islands
//! - Sigil assignment for a claim next to a large territory

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use guild_sigils::core::types::{ChunkId, SigilId, TerritoryId};
use guild_sigils::spatial::ChunkPos;
use guild_sigils::territory::{connected_groups, resolve_assignment, ClaimedChunk};

/// Square blob of `side * side` chunks
fn blob(side: i32) -> Vec<ChunkPos> {
    (0..side)
        .flat_map(|x| (0..side).map(move |z| ChunkPos::new("w", x, z)))
        .collect()
}

/// Chunks on every third cell, so nothing touches
fn islands(side: i32) -> Vec<ChunkPos> {
    (0..side)
        .flat_map(|x| (0..side).map(move |z| ChunkPos::new("w", x * 3, z * 3)))
        .collect()
}

/// Vertical strips of chunks, each strip its own sigil
fn striped_chunks(side: i32) -> Vec<ClaimedChunk> {
    let now = Utc::now();
    (0..side)
        .flat_map(|x| (0..side).map(move |z| (x, z)))
        .enumerate()
        .map(|(i, (x, z))| ClaimedChunk {
            id: ChunkId(i as i64 + 1),
            territory: TerritoryId(1),
            pos: ChunkPos::new("w", x * 2, z),
            marker_elevation: 65,
            insertion_order: i as u32 + 1,
            sigil: Some(SigilId(x as i64 + 1)),
            added_at: now,
        })
        .collect()
}

fn bench_connected_groups(c: &mut Criterion) {
    let mut group = c.benchmark_group("connected_groups");

    for &side in &[4, 16, 64] {
        let positions = blob(side);
        group.throughput(Throughput::Elements(positions.len() as u64));
        group.bench_with_input(BenchmarkId::new("blob", side), &positions, |b, positions| {
            b.iter(|| connected_groups(black_box(positions)))
        });

        let positions = islands(side);
        group.bench_with_input(BenchmarkId::new("islands", side), &positions, |b, positions| {
            b.iter(|| connected_groups(black_box(positions)))
        });
    }
    group.finish();
}

fn bench_resolve_assignment(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_assignment");

    for &side in &[4, 16, 64] {
        let chunks = striped_chunks(side);
        // Between the first two strips, touching both
        let merging = ChunkPos::new("w", 1, side / 2);
        let isolated = ChunkPos::new("w", -10, -10);

        group.throughput(Throughput::Elements(chunks.len() as u64));
        group.bench_with_input(BenchmarkId::new("merge", side), &chunks, |b, chunks| {
            b.iter(|| resolve_assignment(black_box(chunks), black_box(&merging)))
        });
        group.bench_with_input(BenchmarkId::new("new_group", side), &chunks, |b, chunks| {
            b.iter(|| resolve_assignment(black_box(chunks), black_box(&isolated)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_connected_groups, bench_resolve_assignment);
criterion_main!(benches);
