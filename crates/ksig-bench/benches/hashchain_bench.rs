//! Fold throughput of the hash-chain engine.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ksig_bench::{imprint, sample_links};
use ksig_core::hash::HashAlgorithm;
use ksig_core::hashchain::{aggregate, aggregate_calendar, calendar_aggregation_time};

fn bench_aggregate(c: &mut Criterion) {
    let links = sample_links(24);
    let input = imprint(0xaa);
    c.bench_function("aggregate_24_links", |b| {
        b.iter(|| aggregate(black_box(&links), &input, 0, HashAlgorithm::Sha2_256).unwrap())
    });
}

fn bench_aggregate_calendar(c: &mut Criterion) {
    let links = sample_links(24);
    let input = imprint(0xaa);
    c.bench_function("aggregate_calendar_24_links", |b| {
        b.iter(|| aggregate_calendar(black_box(&links), &input).unwrap())
    });
}

fn bench_calendar_time(c: &mut Criterion) {
    // A valid shape for publication second 2^20 - 1: a pure left spine.
    let links = sample_links(1)
        .into_iter()
        .cycle()
        .take(20)
        .collect::<Vec<_>>();
    c.bench_function("calendar_aggregation_time_20_links", |b| {
        b.iter(|| calendar_aggregation_time(black_box(&links), (1 << 20) - 1).unwrap())
    });
}

criterion_group!(
    benches,
    bench_aggregate,
    bench_aggregate_calendar,
    bench_calendar_time
);
criterion_main!(benches);
