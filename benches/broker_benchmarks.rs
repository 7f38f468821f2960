use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use treebus::{Broker, Callable, DType, Flags, Metadata, Value};

fn broker_with_topic() -> Broker {
    let broker = Broker::new();
    broker
        .topic_add("bench/a/b/value", Metadata::new(DType::I64, "value").with_default(0))
        .unwrap();
    broker
}

fn bench_publish_0_sub(c: &mut Criterion) {
    let broker = broker_with_topic();
    let mut n = 0i64;
    c.bench_function("publish_0_subs", |b| {
        b.iter(|| {
            n += 1;
            broker.publish("bench/a/b/value", black_box(n)).unwrap();
        })
    });
}

fn bench_publish_ancestor_subs(c: &mut Criterion) {
    let broker = broker_with_topic();
    for topic in ["bench", "bench/a", "bench/a/b", "bench/a/b/value"] {
        for _ in 0..3 {
            let callable = Callable::from_fn(|v: &Value| {
                black_box(v);
            });
            broker.subscribe(topic, callable, Flags::PUB).unwrap();
        }
    }
    let mut n = 0i64;
    c.bench_function("publish_ancestor_subs", |b| {
        b.iter(|| {
            n += 1;
            broker.publish("bench/a/b/value", black_box(n)).unwrap();
        })
    });
}

fn bench_publish_unchanged(c: &mut Criterion) {
    let broker = broker_with_topic();
    c.bench_function("publish_unchanged", |b| {
        b.iter(|| broker.publish("bench/a/b/value", black_box(0)).unwrap())
    });
}

fn bench_undo_redo(c: &mut Criterion) {
    let broker = broker_with_topic();
    broker
        .topic_add("bench/other", Metadata::new(DType::I64, "other").with_default(0))
        .unwrap();
    for i in 0..64 {
        let topic = if i % 2 == 0 { "bench/a/b/value" } else { "bench/other" };
        broker.publish(topic, i).unwrap();
    }
    c.bench_function("undo_redo_pair", |b| {
        b.iter(|| {
            broker.undo(1).unwrap();
            broker.redo(1).unwrap();
        })
    });
}

fn bench_process_deferred(c: &mut Criterion) {
    let broker = broker_with_topic();
    let handle = broker.handle();
    c.bench_function("process_100_deferred", |b| {
        b.iter(|| {
            for i in 0..100 {
                handle.publish("bench/a/b/value", json!(i));
            }
            black_box(broker.process())
        })
    });
}

criterion_group!(
    benches,
    bench_publish_0_sub,
    bench_publish_ancestor_subs,
    bench_publish_unchanged,
    bench_undo_redo,
    bench_process_deferred
);
criterion_main!(benches);
