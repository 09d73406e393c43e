use std::{hint::black_box, sync::Arc};

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tidebus::{Broker, BrokerOptions, MemoryStore, PubSubEngine, QueueOptions};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let rt = runtime();
    let broker = Broker::new(MemoryStore::new(), BrokerOptions::default());
    c.bench_function("publish_0_subs", |b| {
        b.to_async(&rt).iter(|| async {
            broker
                .publish("bench", black_box(json!({"n": 1})))
                .await
                .unwrap();
        })
    });
}

/// Публикация и получение через очередь доставки: одно событие за итерацию.
fn bench_queue_round_trip(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("queue_round_trip");

    for local_cache in [false, true] {
        let options = BrokerOptions {
            local_cache,
            ..Default::default()
        };
        let broker = Arc::new(Broker::new(MemoryStore::new(), options));
        let queue = rt
            .block_on(broker.delivery_queue("bench", QueueOptions::default()))
            .unwrap();

        group.bench_with_input(
            BenchmarkId::new("local_cache", local_cache),
            &local_cache,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    broker.publish("bench", json!(1)).await.unwrap();
                    black_box(queue.next().await.unwrap());
                })
            },
        );

        rt.block_on(queue.close());
    }
    group.finish();
}

/// Слияние нескольких топиков в одну очередь.
fn bench_queue_merge(c: &mut Criterion) {
    let rt = runtime();
    let broker = Arc::new(Broker::new(MemoryStore::new(), BrokerOptions::default()));
    let topics = ["m0", "m1", "m2", "m3"];
    let queue = rt
        .block_on(broker.delivery_queue(topics, QueueOptions::default()))
        .unwrap();

    c.bench_function("queue_merge_4_topics", |b| {
        b.to_async(&rt).iter(|| async {
            for topic in topics {
                broker.publish(topic, json!(topic)).await.unwrap();
            }
            for _ in topics {
                black_box(queue.next().await.unwrap());
            }
        })
    });

    rt.block_on(queue.close());
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_queue_round_trip,
    bench_queue_merge,
);
criterion_main!(benches);
