//! Очередь доставки: согласует события, которые движок присылает сам
//! (push), с запросами потребителя (pull).
//!
//! Очередь подписывается на все свои топики сразу, сливает их события в
//! одну последовательность и отдаёт их потребителю по одному через
//! [`DeliveryQueue::next`] или как [`futures::Stream`].

mod state;

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Weak,
};

use async_trait::async_trait;
use futures::{future::join_all, stream, Stream};
use parking_lot::Mutex;
use tidebus_error::{StackError, TidebusResult};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use self::state::{Pull, PullOutcome, QueueState};
use crate::{
    pubsub::{Event, Listener, PubSubEngine},
    topic::Topics,
};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(0);

/// Параметры очереди доставки.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Отбрасывать события, опубликованные раньше создания очереди.
    pub only_new: bool,
}

impl QueueOptions {
    pub fn only_new() -> Self {
        Self { only_new: true }
    }
}

/// Готовность подписок очереди.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready,
    Failed,
}

struct Shared {
    id: u64,
    topics: Vec<String>,
    created_at: i64,
    only_new: bool,
    state: Mutex<QueueState>,
    readiness: watch::Sender<Readiness>,
}

impl Shared {
    fn push(
        &self,
        event: Event,
    ) {
        if self.only_new && event.is_before(self.created_at) {
            trace!(queue = self.id, key = %event.key, "Dropped event older than queue");
            return;
        }
        let outcome = self.state.lock().push(event);
        trace!(queue = self.id, ?outcome, "Event pushed");
    }
}

/// Слушатель, через который движок передаёт события в очередь.
///
/// Держит слабую ссылку: регистрация в движке не продлевает жизнь очереди.
struct QueueListener {
    shared: Weak<Shared>,
}

#[async_trait]
impl Listener for QueueListener {
    async fn on_event(
        &self,
        event: Event,
    ) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        // События, пришедшие до окончания подписки на все топики, ждут её.
        let mut readiness = shared.readiness.subscribe();
        let ready = match readiness.wait_for(|r| *r != Readiness::Pending).await {
            Ok(r) => *r == Readiness::Ready,
            Err(_) => false,
        };
        if ready {
            shared.push(event);
        }
    }
}

/// Переводит очередь в `Failed`, если открытие прервано до конца.
struct OpenGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for OpenGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.readiness.send_replace(Readiness::Failed);
        }
    }
}

/// Очередь доставки событий одного потребителя.
///
/// События одного топика выдаются в порядке публикации, события разных
/// топиков перемежаются в порядке прихода. Каждое событие достаётся ровно
/// одному вызову [`next`](Self::next); конкурентные вызовы обслуживаются в
/// порядке поступления.
///
/// При `Drop` работающей очереди регистрации снимаются в фоне.
pub struct DeliveryQueue {
    shared: Arc<Shared>,
    engine: Arc<dyn PubSubEngine>,
}

impl DeliveryQueue {
    /// Подписывается на все топики и возвращает работающую очередь.
    ///
    /// Если хотя бы одна подписка не удалась, уже полученные снимаются, а
    /// ошибка возвращается вызывающему.
    pub async fn open(
        engine: Arc<dyn PubSubEngine>,
        topics: impl Into<Topics>,
        options: QueueOptions,
    ) -> TidebusResult<Self> {
        let topics = topics.into().validated()?;
        let (readiness, _) = watch::channel(Readiness::Pending);
        let shared = Arc::new(Shared {
            id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
            topics,
            created_at: chrono::Utc::now().timestamp_millis(),
            only_new: options.only_new,
            state: Mutex::new(QueueState::new()),
            readiness,
        });
        let mut guard = OpenGuard {
            shared: &shared,
            armed: true,
        };

        let listener: Arc<dyn Listener> = Arc::new(QueueListener {
            shared: Arc::downgrade(&shared),
        });
        let results = join_all(
            shared
                .topics
                .iter()
                .map(|topic| engine.subscribe(topic, listener.clone())),
        )
        .await;

        let mut handles = Vec::with_capacity(results.len());
        let mut first_error = None;
        for result in results {
            match result {
                Ok(id) => handles.push(id),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(err) = first_error {
            drop(guard);
            shared.state.lock().close(None);
            warn!(
                queue = shared.id,
                topics = ?shared.topics,
                error = %err,
                "Delivery queue failed to subscribe"
            );
            for id in handles {
                engine.unsubscribe(id).await;
            }
            return Err(err);
        }

        shared.state.lock().set_handles(handles);
        guard.armed = false;
        drop(guard);
        shared.readiness.send_replace(Readiness::Ready);

        debug!(
            queue = shared.id,
            topics = ?shared.topics,
            only_new = shared.only_new,
            "Delivery queue opened"
        );
        Ok(Self { shared, engine })
    }

    /// Следующее событие.
    ///
    /// `Ok(None)` означает конец последовательности: очередь закрыта.
    /// Ошибка, переданная в [`close_with_error`](Self::close_with_error),
    /// возвращается один раз, после чего последовательность заканчивается.
    pub async fn next(&self) -> TidebusResult<Option<Event>> {
        let outcome = self.shared.state.lock().pull();
        let pull = match outcome {
            PullOutcome::Ready(pull) => pull,
            PullOutcome::Wait(rx) => rx.await.unwrap_or(Pull::End),
        };

        match pull {
            Pull::Event(event) => Ok(Some(event)),
            Pull::End => Ok(None),
            Pull::Failed(err) => Err(err),
        }
    }

    /// Закрывает очередь: ожидающие вызовы `next` получают конец
    /// последовательности, непрочитанные события отбрасываются, подписки
    /// снимаются. Повторный вызов ничего не делает.
    pub async fn close(&self) {
        self.shutdown(None).await
    }

    /// Закрывает очередь с ошибкой, которую получат ожидающие вызовы
    /// `next` (или следующий вызов, если сейчас никто не ждёт).
    pub async fn close_with_error(
        &self,
        error: impl Into<StackError>,
    ) {
        self.shutdown(Some(error.into())).await
    }

    async fn shutdown(
        &self,
        failure: Option<StackError>,
    ) {
        let with_error = failure.is_some();
        let handles = self.shared.state.lock().close(failure);
        let Some(handles) = handles else {
            return;
        };

        for id in handles {
            self.engine.unsubscribe(id).await;
        }
        debug!(queue = self.shared.id, with_error, "Delivery queue closed");
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().is_running()
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn topics(&self) -> &[String] {
        &self.shared.topics
    }

    /// Момент создания очереди, миллисекунды Unix.
    pub fn created_at(&self) -> i64 {
        self.shared.created_at
    }

    /// Число буферизованных событий, которые ещё никто не запросил.
    pub fn pending_deliveries(&self) -> usize {
        self.shared.state.lock().pending_deliveries()
    }

    /// Число вызовов `next`, ожидающих событие.
    pub fn pending_pulls(&self) -> usize {
        self.shared.state.lock().pending_pulls()
    }

    /// Превращает очередь в поток. Поток заканчивается вместе с
    /// последовательностью.
    pub fn into_stream(self) -> impl Stream<Item = TidebusResult<Event>> + Send + 'static {
        stream::unfold(self, |queue| async move {
            match queue.next().await {
                Ok(Some(event)) => Some((Ok(event), queue)),
                Ok(None) => None,
                Err(err) => Some((Err(err), queue)),
            }
        })
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("id", &self.shared.id)
            .field("topics", &self.shared.topics)
            .field("only_new", &self.shared.only_new)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        let Some(handles) = self.shared.state.lock().close(None) else {
            return;
        };
        if handles.is_empty() {
            return;
        }

        let engine = self.engine.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for id in handles {
                        engine.unsubscribe(id).await;
                    }
                });
            }
            Err(_) => warn!(
                queue = self.shared.id,
                registrations = handles.len(),
                "Delivery queue dropped outside a runtime, registrations not released"
            ),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tidebus_error::{GenericError, StatusCode};
    use tokio::time::{sleep, timeout, Duration};

    use super::*;
    use crate::{
        pubsub::{Broker, BrokerOptions},
        store::MemoryStore,
    };

    fn broker() -> Arc<Broker<MemoryStore>> {
        Arc::new(Broker::new(MemoryStore::new(), BrokerOptions::default()))
    }

    async fn next_payload(queue: &DeliveryQueue) -> serde_json::Value {
        timeout(Duration::from_secs(1), queue.next())
            .await
            .expect("timed out")
            .expect("queue failed")
            .expect("queue ended")
            .payload
    }

    #[tokio::test]
    async fn test_existing_events_are_replayed() {
        let broker = broker();
        broker.publish("t", json!(1)).await.unwrap();

        let queue = broker.delivery_queue("t", QueueOptions::default()).await.unwrap();
        assert_eq!(next_payload(&queue).await, json!(1));
    }

    #[tokio::test]
    async fn test_only_new_skips_history() {
        let broker = broker();
        broker.publish_at("t", json!("old"), Some(0)).await.unwrap();

        let queue = broker.delivery_queue("t", QueueOptions::only_new()).await.unwrap();
        broker.publish("t", json!("new")).await.unwrap();
        assert_eq!(next_payload(&queue).await, json!("new"));
    }

    #[tokio::test]
    async fn test_untimed_events_pass_only_new() {
        let broker = broker();
        broker.publish_at("t", json!("untimed"), None).await.unwrap();

        let queue = broker.delivery_queue("t", QueueOptions::only_new()).await.unwrap();
        assert_eq!(next_payload(&queue).await, json!("untimed"));
    }

    #[tokio::test]
    async fn test_close_resolves_waiting_next() {
        let broker = broker();
        let queue = Arc::new(broker.delivery_queue("t", QueueOptions::default()).await.unwrap());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        while queue.pending_pulls() == 0 {
            sleep(Duration::from_millis(1)).await;
        }

        queue.close().await;
        let res = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(res.unwrap().is_none());
        assert_eq!(broker.subscription_count(), 0);
        queue.close().await;
    }

    #[tokio::test]
    async fn test_close_with_error_surfaces_once() {
        let broker = broker();
        let queue = broker.delivery_queue("t", QueueOptions::default()).await.unwrap();

        queue
            .close_with_error(GenericError::new(StatusCode::ConsumerAborted, "stop"))
            .await;
        let err = queue.next().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::ConsumerAborted);
        assert!(queue.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_registrations() {
        let broker = broker();
        let queue = broker.delivery_queue(["a", "b"], QueueOptions::default()).await.unwrap();
        assert_eq!(broker.subscription_count(), 2);

        drop(queue);
        timeout(Duration::from_secs(1), async {
            while broker.subscription_count() > 0 {
                sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("registrations were not released");
    }

    #[tokio::test]
    async fn test_stream_yields_in_order() {
        use futures::StreamExt;

        let broker = broker();
        for i in 0..3 {
            broker.publish("t", json!(i)).await.unwrap();
        }
        let queue = broker.delivery_queue("t", QueueOptions::default()).await.unwrap();
        while queue.pending_deliveries() < 3 {
            sleep(Duration::from_millis(1)).await;
        }

        let mut stream = Box::pin(queue.into_stream());
        for i in 0..3 {
            assert_eq!(stream.next().await.unwrap().unwrap().payload, json!(i));
        }
    }

    #[tokio::test]
    async fn test_invalid_topics_fail_before_subscribing() {
        let broker = broker();
        let err = broker
            .delivery_queue(Vec::<String>::new(), QueueOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);
        assert_eq!(broker.subscription_count(), 0);
    }
}
