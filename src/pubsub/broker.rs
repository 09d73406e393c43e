use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tidebus_error::{ResultExt, TidebusResult};
use tokio::{
    sync::broadcast::{self, error::RecvError, error::TryRecvError},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{
    local::{LocalFanout, RecentKeys},
    Event, Listener, PubSubEngine, SubscriptionId,
};
use crate::{
    queue::{DeliveryQueue, QueueOptions},
    store::{Envelope, EventStore, StoredEntry, TopicWatch},
    topic::{validate_topic, Topics},
};

/// Параметры брокера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    /// Раздавать события подписчикам этого процесса сразу при публикации.
    pub local_cache: bool,
    /// Сколько ключ локально доставленного события подавляет его копию из
    /// хранилища.
    pub local_cache_ttl: Duration,
    /// Ёмкость локальных каналов и кеша ключей каждой подписки.
    pub local_cache_capacity: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            local_cache: false,
            local_cache_ttl: Duration::from_millis(60),
            local_cache_capacity: 4096,
        }
    }
}

struct Registration {
    topic: Arc<str>,
    task: JoinHandle<()>,
}

/// Брокер поверх упорядоченного хранилища.
///
/// Публикация кладёт запись под новым ключом в топик хранилища. Каждая
/// подписка обслуживается отдельной задачей, которая отдаёт слушателю
/// сначала существующие записи топика, затем новые, строго по порядку.
///
/// С включённым `local_cache` события дополнительно раздаются подписчикам
/// этого процесса в момент публикации, а их копии из хранилища
/// подавляются в пределах `local_cache_ttl`.
pub struct Broker<S: EventStore + ?Sized> {
    store: Arc<S>,
    options: BrokerOptions,
    subscriptions: DashMap<SubscriptionId, Registration>,
    next_id: AtomicU64,
    local: Option<Arc<LocalFanout>>,
    /// Общее количество успешных публикаций
    pub publish_count: AtomicUsize,
    /// Общее количество вызовов слушателей
    delivered: Arc<AtomicUsize>,
}

impl<S: EventStore> Broker<S> {
    pub fn new(
        store: S,
        options: BrokerOptions,
    ) -> Self {
        Self::with_shared_store(Arc::new(store), options)
    }
}

impl<S: EventStore + ?Sized> Broker<S> {
    /// Брокер над хранилищем, которое используется и в других местах
    /// (например, для очистки).
    pub fn with_shared_store(
        store: Arc<S>,
        options: BrokerOptions,
    ) -> Self {
        let local = options
            .local_cache
            .then(|| Arc::new(LocalFanout::new(options.local_cache_capacity)));
        Self {
            store,
            options,
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(0),
            local,
            publish_count: AtomicUsize::new(0),
            delivered: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    /// Публикует событие с явной меткой времени (или без неё).
    pub async fn publish_at(
        &self,
        topic: &str,
        payload: serde_json::Value,
        timestamp: Option<i64>,
    ) -> TidebusResult<Event> {
        validate_topic(topic)?;

        let event = Event {
            topic: topic.to_string(),
            key: Uuid::new_v4().to_string(),
            payload,
            timestamp,
        };

        if let Some(local) = &self.local {
            let receivers = local.emit(&event);
            trace!(topic, receivers, "Local fan-out");
        }

        self.store
            .append(
                topic,
                &event.key,
                Envelope::new(event.payload.clone(), event.timestamp),
            )
            .await
            .with_context(|| format!("publish to '{topic}'"))?;

        self.publish_count.fetch_add(1, Ordering::Relaxed);
        Ok(event)
    }

    /// Публикует событие с меткой текущего времени и возвращает его.
    pub async fn publish_event(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> TidebusResult<Event> {
        let now = chrono::Utc::now().timestamp_millis();
        self.publish_at(topic, payload, Some(now)).await
    }

    /// Открывает очередь доставки на один или несколько топиков.
    pub async fn delivery_queue(
        self: &Arc<Self>,
        topics: impl Into<Topics>,
        options: QueueOptions,
    ) -> TidebusResult<DeliveryQueue> {
        DeliveryQueue::open(self.clone(), topics, options).await
    }

    /// Количество активных регистраций.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Количество активных регистраций на топик.
    pub fn topic_subscription_count(
        &self,
        topic: &str,
    ) -> usize {
        self.subscriptions
            .iter()
            .filter(|r| &*r.value().topic == topic)
            .count()
    }

    /// Общее количество вызовов слушателей.
    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<S: EventStore + ?Sized> PubSubEngine for Broker<S> {
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> TidebusResult<()> {
        self.publish_event(topic, payload).await.map(|_| ())
    }

    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn Listener>,
    ) -> TidebusResult<SubscriptionId> {
        validate_topic(topic)?;

        // Локальный канал открывается раньше снимка: всё, что попало в
        // снимок через локальную раздачу, уже лежит в канале.
        let local = self.local.as_ref().map(|l| l.subscribe(topic));
        let watch = self
            .store
            .watch(topic)
            .await
            .with_context(|| format!("subscribe to '{topic}'"))?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let topic: Arc<str> = Arc::from(topic);
        let recent = local.as_ref().map(|_| {
            RecentKeys::new(self.options.local_cache_capacity, self.options.local_cache_ttl)
        });

        let pump = Pump {
            id,
            topic: topic.clone(),
            listener,
            local,
            recent,
            delivered: self.delivered.clone(),
        };
        let task = tokio::spawn(pump.run(watch));
        self.subscriptions.insert(id, Registration { topic, task });

        debug!(%id, "Listener subscribed");
        Ok(id)
    }

    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) {
        if let Some((_, registration)) = self.subscriptions.remove(&id) {
            registration.task.abort();
            debug!(%id, topic = %registration.topic, "Listener unsubscribed");
        }
    }
}

impl<S: EventStore + ?Sized> Drop for Broker<S> {
    fn drop(&mut self) {
        for registration in self.subscriptions.iter() {
            registration.task.abort();
        }
    }
}

/// Задача доставки одной подписки.
struct Pump {
    id: SubscriptionId,
    topic: Arc<str>,
    listener: Arc<dyn Listener>,
    local: Option<broadcast::Receiver<Event>>,
    recent: Option<RecentKeys>,
    delivered: Arc<AtomicUsize>,
}

impl Pump {
    async fn run(
        mut self,
        watch: TopicWatch,
    ) {
        let TopicWatch { snapshot, mut live } = watch;

        // Всё, что попало и в снимок, и в локальный канал, уже лежит в
        // канале к этому моменту: канал открыт раньше снимка.
        let mut history = HashSet::new();
        for entry in snapshot {
            if self.local.is_some() {
                history.insert(entry.key.clone());
            }
            self.deliver_stored(entry).await;
        }
        self.drain_local(&history).await;
        drop(history);

        loop {
            // Локальная копия отправляется раньше записи в хранилище, поэтому
            // локальный канал опрашивается первым.
            tokio::select! {
                biased;
                message = recv_local(&mut self.local) => match message {
                    Ok(event) => self.deliver_local(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        // Пропущенные события придут из хранилища.
                        warn!(id = %self.id, topic = %self.topic, skipped, "Local fan-out lagged");
                    }
                    Err(RecvError::Closed) => self.local = None,
                },
                entry = live.recv() => match entry {
                    Some(entry) => self.deliver_stored(entry).await,
                    None => break,
                },
            }
        }
        trace!(id = %self.id, "Subscription pump finished");
    }

    /// Разбирает накопленные локальные события, пропуская те, что уже
    /// доставлены из снимка.
    async fn drain_local(
        &mut self,
        history: &HashSet<String>,
    ) {
        while let Some(rx) = self.local.as_mut() {
            match rx.try_recv() {
                Ok(event) if history.contains(&event.key) => {
                    trace!(id = %self.id, key = %event.key, "Skipped local copy of history entry");
                }
                Ok(event) => self.deliver_local(event).await,
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Closed) => self.local = None,
            }
        }
    }

    async fn deliver_local(
        &mut self,
        event: Event,
    ) {
        if let Some(recent) = self.recent.as_mut() {
            recent.remember(event.key.clone());
        }
        self.dispatch(event).await;
    }

    async fn deliver_stored(
        &mut self,
        entry: StoredEntry,
    ) {
        if let Some(recent) = self.recent.as_mut() {
            if recent.take_fresh(&entry.key) {
                trace!(id = %self.id, key = %entry.key, "Suppressed stored copy of local event");
                return;
            }
        }
        let event = Event::from_entry(&self.topic, entry);
        self.dispatch(event).await;
    }

    async fn dispatch(
        &self,
        event: Event,
    ) {
        self.listener.on_event(event).await;
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }
}

async fn recv_local(rx: &mut Option<broadcast::Receiver<Event>>) -> Result<Event, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
