//! Parse/serialize throughput of the TLV codec on signature-shaped trees.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use ksig_bench::sample_tree;
use ksig_core::tlv::Tlv;

fn bench_serialize(c: &mut Criterion) {
    let tree = sample_tree(3, 16);
    c.bench_function("tlv_serialize_3x16", |b| {
        b.iter(|| black_box(&tree).serialize().unwrap())
    });
}

fn bench_parse(c: &mut Criterion) {
    let bytes = sample_tree(3, 16).serialize().unwrap();
    c.bench_function("tlv_parse_3x16", |b| {
        b.iter(|| Tlv::parse(black_box(&bytes)).unwrap())
    });
}

fn bench_parse_and_expand(c: &mut Criterion) {
    let bytes = sample_tree(3, 16).serialize().unwrap();
    c.bench_function("tlv_parse_expand_3x16", |b| {
        b.iter(|| {
            Tlv::parse(black_box(&bytes))
                .unwrap()
                .into_children()
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_serialize, bench_parse, bench_parse_and_expand);
criterion_main!(benches);
