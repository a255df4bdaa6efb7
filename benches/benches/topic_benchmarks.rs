use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use psos::{matches, pubsub::validate_filter};

fn bench_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("matches");
    let topic = "home/kitchen/sensor/3/temp";
    for filter in [
        "home/kitchen/sensor/3/temp",
        "home/+/sensor/+/temp",
        "home/#",
        "#",
        "home/kitchen/sensor/3/humidity",
        "office/+/sensor/+/temp",
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(filter), &filter, |b, f| {
            b.iter(|| matches(black_box(f), black_box(topic)))
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    c.bench_function("validate_filter_wildcards", |b| {
        b.iter(|| validate_filter(black_box("home/+/sensor/+/#")))
    });
}

criterion_group!(benches, bench_matches, bench_validate);
criterion_main!(benches);
