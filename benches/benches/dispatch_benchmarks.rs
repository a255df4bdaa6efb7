use std::hint::black_box;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use psos::{delivery_queue, DeliveryQueue, QoS, Registry};

/// Реестр с `n` подписками, из которых совпадает с `sensor/1/temp` каждая
/// десятая.
fn registry_with(n: usize) -> (Registry, Vec<DeliveryQueue>) {
    let registry = Registry::offline();
    let mut queues = Vec::with_capacity(n);
    for i in 0..n {
        let (handle, queue) = delivery_queue();
        let filter = if i % 10 == 0 {
            "sensor/+/temp".to_string()
        } else {
            format!("device/{i}/cmd")
        };
        registry.subscribe(&filter, &handle, QoS::AtMostOnce).unwrap();
        queues.push(queue);
    }
    (registry, queues)
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_dispatch");
    let payload = Bytes::from_static(b"21.5");

    for n in [1usize, 10, 100, 1000] {
        let (registry, mut queues) = registry_with(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let delivered = registry.dispatch(black_box("sensor/1/temp"), payload.clone());
                for q in queues.iter_mut() {
                    while q.try_recv().is_ok() {}
                }
                delivered
            })
        });
    }
    group.finish();
}

fn bench_subscribe_unsubscribe(c: &mut Criterion) {
    let (registry, _queues) = registry_with(100);
    c.bench_function("subscribe_unsubscribe_100", |b| {
        b.iter(|| {
            let (handle, _queue) = delivery_queue();
            registry
                .subscribe(black_box("display/#"), &handle, QoS::AtMostOnce)
                .unwrap();
            registry.unsubscribe(&handle)
        })
    });
}

criterion_group!(benches, bench_dispatch, bench_subscribe_unsubscribe);
criterion_main!(benches);
