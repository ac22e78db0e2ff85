//! Performance benchmarks for case generation
//!
//! Run with: cargo bench
//!
//! The algebra must stay lazy and cheap over combinatorially large
//! spaces: these benchmarks cover flat cartesian products, dependent
//! sub-combinations, and identity-string serialization.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use prism::params::{params, ParamSpec};

fn flat_spec() -> ParamSpec {
    params()
        .combine("i", 0..100i64)
        .combine("j", 0..100i64)
        .toggle("flag")
}

/// Benchmark: streaming a 20k-case flat product.
fn bench_flat_product(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_product");
    group.throughput(Throughput::Elements(20_000));
    group.bench_function("count", |b| {
        let spec = flat_spec();
        b.iter(|| black_box(spec.case_count().unwrap()))
    });
    group.finish();
}

/// Benchmark: dependent sub-combination per parent case.
fn bench_subcases(c: &mut Criterion) {
    let mut group = c.benchmark_group("subcases");
    group.throughput(Throughput::Elements(4_000));
    group.bench_function("count", |b| {
        let spec = params()
            .combine("outer", 0..400i64)
            .subcases(|p| {
                let wide = p.int("outer")? % 2 == 0;
                let values: Vec<i64> = if wide { (0..16).collect() } else { (0..4).collect() };
                Ok(params().combine("inner", values))
            });
        b.iter(|| black_box(spec.case_count().unwrap()))
    });
    group.finish();
}

/// Benchmark: filtering plus identity serialization.
fn bench_identity_strings(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity");
    group.bench_function("serialize_20k", |b| {
        let spec = flat_spec();
        b.iter(|| {
            let mut total = 0usize;
            for case in spec.cases() {
                total += case.unwrap().id_string().len();
            }
            black_box(total)
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_flat_product,
    bench_subcases,
    bench_identity_strings
);
criterion_main!(benches);
