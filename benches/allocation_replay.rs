//! Allocation timeline build and point-in-time query cost
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench allocation_replay
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rastro::allocations::AllocationsProvider;
use rastro::session::SessionContext;

/// Churn over a fixed pool of addresses: allocate, grow, free
fn build_timeline(edits: u64) -> AllocationsProvider {
    let mut timeline = AllocationsProvider::new(SessionContext::new(0, 1_000_000, 1));
    timeline.init(0.0, 8, 0, 0, 0);
    for i in 0..edits {
        let time = i as f64 * 1e-6;
        let address = 0x10_0000 + (i % 1024) * 0x40;
        match i % 4 {
            0 | 1 => {
                timeline.alloc(time, 1, address, 32 + (i % 7) * 8, 8, 0, (i % 16) as u32);
            }
            2 => {
                timeline.realloc(time, 1, address, address, 64, 8, 0, (i % 16) as u32);
            }
            _ => {
                timeline.free(time, 1, address);
            }
        }
    }
    timeline
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_build");
    for edits in [1_000u64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(edits), &edits, |b, &edits| {
            b.iter(|| build_timeline(black_box(edits)));
        });
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let timeline = build_timeline(100_000);
    let mid = 50_000.0 * 1e-6;

    c.bench_function("live_at_mid", |b| {
        b.iter(|| timeline.live_at(black_box(mid)).len());
    });
    c.bench_function("live_bytes_in_region", |b| {
        b.iter(|| timeline.live_bytes_in_region(black_box(0x10_0000), 0x4000, mid));
    });
    c.bench_function("summary_at_mid", |b| {
        b.iter(|| timeline.summary_at(black_box(mid)));
    });
}

criterion_group!(benches, bench_build, bench_queries);
criterion_main!(benches);
