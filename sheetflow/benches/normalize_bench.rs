//! Benchmarks for table normalization.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sheetflow::table::{normalize_for_upload, parse_rows, rows_to_string};
use sheetflow::testing::etf_csv;

fn normalize_benchmark(c: &mut Criterion) {
    let csv = etf_csv(500);
    let rows = parse_rows(&csv).unwrap_or_default();

    c.bench_function("parse_500_rows", |b| b.iter(|| parse_rows(black_box(&csv))));
    c.bench_function("normalize_500_rows", |b| {
        b.iter(|| normalize_for_upload(black_box(&rows)))
    });
    c.bench_function("normalize_and_write_500_rows", |b| {
        b.iter(|| rows_to_string(&normalize_for_upload(black_box(&rows))))
    });
}

criterion_group!(benches, normalize_benchmark);
criterion_main!(benches);
