use std::hint::black_box;

use bytes::{Bytes, BytesMut};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use psos::{
    network::mqtt::{packet::Publish, MqttCodec, Packet},
    QoS,
};

fn publish(size: usize) -> Packet {
    Packet::Publish(Publish {
        topic: "home/kitchen/sensor/3/temp".to_string(),
        packet_id: Some(7),
        payload: Bytes::from(vec![b'x'; size]),
        qos: QoS::AtLeastOnce,
        dup: false,
        retain: false,
    })
}

fn bench_encode(c: &mut Criterion) {
    let codec = MqttCodec::new();
    let mut group = c.benchmark_group("publish_encode");
    for size in [16usize, 256, 4096] {
        let packet = publish(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &packet, |b, p| {
            let mut buf = BytesMut::with_capacity(size + 64);
            b.iter(|| {
                buf.clear();
                codec.encode(black_box(p), &mut buf).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let codec = MqttCodec::new();
    let mut group = c.benchmark_group("publish_decode");
    for size in [16usize, 256, 4096] {
        let mut wire = BytesMut::new();
        codec.encode(&publish(size), &mut wire).unwrap();
        let wire = wire.freeze();
        group.throughput(Throughput::Bytes(wire.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| {
                let mut buf = BytesMut::from(&w[..]);
                codec.decode(black_box(&mut buf)).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
