//! Общие помощники интеграционных тестов.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tidebus::{Event, Listener, PubSubEngine, SubscriptionId, TidebusResult};
use tidebus_error::PubSubError;
use tokio::{sync::Notify, time::timeout};

/// Движок-заглушка: хранит слушателей, записывает вызовы `unsubscribe` и
/// умеет отказывать в подписке или задерживать её.
#[derive(Default)]
pub struct RecordingEngine {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<SubscriptionId, (String, Arc<dyn Listener>)>>,
    unsubscribed: Mutex<Vec<SubscriptionId>>,
    failing: HashSet<String>,
    gate: Option<(String, Arc<Notify>)>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Подписка на `topic` завершается ошибкой.
    pub fn failing(topic: &str) -> Self {
        Self {
            failing: HashSet::from([topic.to_string()]),
            ..Default::default()
        }
    }

    /// Подписка на `topic` ждёт сигнала от возвращённого `Notify`.
    pub fn gated(topic: &str) -> (Self, Arc<Notify>) {
        let notify = Arc::new(Notify::new());
        let engine = Self {
            gate: Some((topic.to_string(), notify.clone())),
            ..Default::default()
        };
        (engine, notify)
    }

    /// Передаёт событие всем слушателям топика.
    pub async fn emit(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) {
        self.emit_event(Event::new(topic, payload)).await
    }

    pub async fn emit_event(
        &self,
        event: Event,
    ) {
        let listeners: Vec<Arc<dyn Listener>> = self
            .listeners
            .lock()
            .values()
            .filter(|(topic, _)| *topic == event.topic)
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener.on_event(event.clone()).await;
        }
    }

    pub fn listener_count(
        &self,
        topic: &str,
    ) -> usize {
        self.listeners
            .lock()
            .values()
            .filter(|(t, _)| t == topic)
            .count()
    }

    pub fn active(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn unsubscribed(&self) -> Vec<SubscriptionId> {
        self.unsubscribed.lock().clone()
    }
}

#[async_trait]
impl PubSubEngine for RecordingEngine {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> TidebusResult<()> {
        self.emit(topic, payload).await;
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn Listener>,
    ) -> TidebusResult<SubscriptionId> {
        if let Some((gated, notify)) = &self.gate {
            if gated == topic {
                notify.notified().await;
            }
        }
        if self.failing.contains(topic) {
            return Err(PubSubError::SubscribeFailed {
                topic: topic.to_string(),
                reason: "engine refused".to_string(),
            }
            .into());
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .lock()
            .insert(id, (topic.to_string(), listener));
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) {
        self.listeners.lock().remove(&id);
        self.unsubscribed.lock().push(id);
    }
}

/// Ждёт выполнения условия не дольше секунды.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    timeout(Duration::from_secs(1), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
