//! Очередь доставки поверх брокера с хранилищем в памяти.

mod common;

use std::{collections::HashMap, sync::Arc, time::Duration};

use common::eventually;
use serde_json::{json, Value};
use tidebus::{Broker, BrokerOptions, DeliveryQueue, MemoryStore, PubSubEngine, QueueOptions};
use tokio::time::timeout;

type MemoryBroker = Arc<Broker<MemoryStore>>;

fn broker(options: BrokerOptions) -> MemoryBroker {
    Arc::new(Broker::new(MemoryStore::new(), options))
}

async fn next_payload(queue: &DeliveryQueue) -> Value {
    timeout(Duration::from_secs(1), queue.next())
        .await
        .expect("timed out")
        .unwrap()
        .expect("sequence ended")
        .payload
}

/// Тест проверяет, что N опубликованных событий дают ровно N событий в
/// порядке публикации, включая записанные до открытия очереди.
#[tokio::test]
async fn test_queue_delivers_history_then_live_in_order() {
    let broker = broker(BrokerOptions::default());
    for i in 0..5 {
        broker.publish("orders", json!(i)).await.unwrap();
    }

    let queue = broker
        .delivery_queue("orders", QueueOptions::default())
        .await
        .unwrap();
    for i in 5..10 {
        broker.publish("orders", json!(i)).await.unwrap();
    }

    for i in 0..10 {
        assert_eq!(next_payload(&queue).await, json!(i));
    }
    assert!(timeout(Duration::from_millis(30), queue.next()).await.is_err());
    queue.close().await;
}

#[tokio::test]
async fn test_merged_topics_keep_per_topic_order() {
    let broker = broker(BrokerOptions::default());
    let queue = broker
        .delivery_queue(["a", "b"], QueueOptions::default())
        .await
        .unwrap();

    for i in 0..4 {
        broker.publish("a", json!({ "t": "a", "n": i })).await.unwrap();
        broker.publish("b", json!({ "t": "b", "n": i })).await.unwrap();
    }

    let mut seen: HashMap<String, Vec<i64>> = HashMap::new();
    for _ in 0..8 {
        let payload = next_payload(&queue).await;
        seen.entry(payload["t"].as_str().unwrap().to_string())
            .or_default()
            .push(payload["n"].as_i64().unwrap());
    }

    assert_eq!(seen["a"], vec![0, 1, 2, 3]);
    assert_eq!(seen["b"], vec![0, 1, 2, 3]);
    queue.close().await;
    assert_eq!(broker.subscription_count(), 0);
}

/// Тест проверяет, что конкурентные вызовы `next` обслуживаются в порядке
/// поступления и каждый получает своё событие.
#[tokio::test]
async fn test_concurrent_pulls_are_fifo() {
    let broker = broker(BrokerOptions::default());
    let queue = Arc::new(
        broker
            .delivery_queue("t", QueueOptions::default())
            .await
            .unwrap(),
    );

    let mut waiters = Vec::new();
    for n in 1..=3 {
        let q = queue.clone();
        waiters.push(tokio::spawn(async move { q.next().await }));
        eventually(|| queue.pending_pulls() == n).await;
    }

    for i in 0..3 {
        broker.publish("t", json!(i)).await.unwrap();
    }

    for (i, waiter) in waiters.into_iter().enumerate() {
        let event = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("timed out")
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.payload, json!(i));
    }
    queue.close().await;
}

/// Тест проверяет фильтр «только новые» на записях хранилища: запись с
/// меткой до создания очереди пропускается, новая доставляется.
#[tokio::test]
async fn test_only_new_skips_stored_history() {
    let broker = broker(BrokerOptions::default());
    let now = chrono::Utc::now().timestamp_millis();
    broker
        .publish_at("A", json!("stale"), Some(now - 1_000))
        .await
        .unwrap();

    let queue = broker
        .delivery_queue("A", QueueOptions::only_new())
        .await
        .unwrap();
    broker
        .publish_at("A", json!("fresh"), Some(queue.created_at() + 10))
        .await
        .unwrap();

    assert_eq!(next_payload(&queue).await, json!("fresh"));
    assert_eq!(queue.pending_deliveries(), 0);
    queue.close().await;
}

#[tokio::test]
async fn test_close_unsubscribes_from_broker() {
    let broker = broker(BrokerOptions::default());
    let queue = broker
        .delivery_queue(["x", "y", "z"], QueueOptions::default())
        .await
        .unwrap();
    assert_eq!(broker.subscription_count(), 3);
    assert_eq!(broker.topic_subscription_count("y"), 1);

    queue.close().await;
    assert_eq!(broker.subscription_count(), 0);
    eventually(|| broker.store().watcher_count("x") == 0).await;

    broker.publish("x", json!("after")).await.unwrap();
    assert!(queue.next().await.unwrap().is_none());
}

/// Тест проверяет локальную раздачу: издатель, подписанный в том же
/// процессе, получает своё событие, а копия из хранилища не повторяется.
#[tokio::test]
async fn test_local_cache_delivers_each_event_once() {
    let broker = broker(BrokerOptions {
        local_cache: true,
        local_cache_ttl: Duration::from_secs(5),
        ..Default::default()
    });
    let queue = broker
        .delivery_queue("chat", QueueOptions::default())
        .await
        .unwrap();

    for i in 0..10 {
        broker.publish("chat", json!(i)).await.unwrap();
    }
    for i in 0..10 {
        assert_eq!(next_payload(&queue).await, json!(i));
    }
    assert!(timeout(Duration::from_millis(50), queue.next()).await.is_err());
    assert_eq!(broker.store().len("chat"), 10);
    queue.close().await;
}

/// Тест проверяет, что две очереди на один топик получают все события
/// независимо друг от друга.
#[tokio::test]
async fn test_independent_queues_each_get_all_events() {
    let broker = broker(BrokerOptions::default());
    let q1 = broker
        .delivery_queue("t", QueueOptions::default())
        .await
        .unwrap();
    let q2 = broker
        .delivery_queue("t", QueueOptions::default())
        .await
        .unwrap();

    broker.publish("t", json!("one")).await.unwrap();
    assert_eq!(next_payload(&q1).await, json!("one"));
    assert_eq!(next_payload(&q2).await, json!("one"));

    q1.close().await;
    broker.publish("t", json!("two")).await.unwrap();
    assert_eq!(next_payload(&q2).await, json!("two"));
    q2.close().await;
}
