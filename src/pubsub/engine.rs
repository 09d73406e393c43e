use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tidebus_error::TidebusResult;

use super::Event;

/// Идентификатор регистрации слушателя в движке.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Получатель событий одного топика.
///
/// Движок вызывает `on_event` последовательно: следующий вызов для той же
/// подписки начинается только после завершения предыдущего.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    async fn on_event(
        &self,
        event: Event,
    );
}

#[async_trait]
impl<F> Listener for F
where
    F: Fn(Event) + Send + Sync + 'static,
{
    async fn on_event(
        &self,
        event: Event,
    ) {
        (self)(event)
    }
}

/// Контракт pub/sub движка, поверх которого работает очередь доставки.
#[async_trait]
pub trait PubSubEngine: Send + Sync + 'static {
    /// Публикует полезную нагрузку в топик.
    async fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> TidebusResult<()>;

    /// Регистрирует слушателя топика. Слушатель получает все записи
    /// топика, включая уже существующие.
    async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn Listener>,
    ) -> TidebusResult<SubscriptionId>;

    /// Снимает регистрацию. Неизвестный идентификатор игнорируется.
    async fn unsubscribe(
        &self,
        id: SubscriptionId,
    );
}
