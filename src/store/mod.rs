//! Упорядоченное хранилище событий.
//!
//! Каждый топик хранит записи под уникальным ключом в порядке добавления.
//! Брокер читает топик через [`EventStore::watch`]: сначала снимок уже
//! существующих записей, затем живой хвост новых, без пропусков и
//! повторов между ними.

pub mod codec;
pub mod file;
pub mod memory;

pub use file::*;
pub use memory::*;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tidebus_error::TidebusResult;
use tokio::sync::mpsc;

/// Сохраняемое содержимое записи: полезная нагрузка и метка времени
/// публикации в миллисекундах Unix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(
        payload: serde_json::Value,
        timestamp: Option<i64>,
    ) -> Self {
        Self { payload, timestamp }
    }
}

/// Запись топика в том виде, в котором её видит читатель.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    /// Порядковый номер внутри топика, строго возрастает.
    pub seq: u64,
    pub key: String,
    pub envelope: Envelope,
}

/// Подписка на топик хранилища.
#[derive(Debug)]
pub struct TopicWatch {
    /// Записи, существовавшие в момент подписки, в порядке добавления.
    pub snapshot: Vec<StoredEntry>,
    /// Записи, добавленные после снимка.
    pub live: mpsc::UnboundedReceiver<StoredEntry>,
}

/// Постоянное хранилище, упорядоченное по ключу внутри топика.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Добавляет запись в конец топика.
    async fn append(
        &self,
        topic: &str,
        key: &str,
        envelope: Envelope,
    ) -> TidebusResult<StoredEntry>;

    /// Все записи топика в порядке добавления.
    async fn entries(
        &self,
        topic: &str,
    ) -> TidebusResult<Vec<StoredEntry>>;

    /// Записи с меткой времени не позже `cutoff_ms`. Записи без метки не
    /// выбираются.
    async fn range_until(
        &self,
        topic: &str,
        cutoff_ms: i64,
    ) -> TidebusResult<Vec<StoredEntry>>;

    /// Удаляет запись. Возвращает `false`, если ключа не было.
    async fn remove(
        &self,
        topic: &str,
        key: &str,
    ) -> TidebusResult<bool>;

    async fn watch(
        &self,
        topic: &str,
    ) -> TidebusResult<TopicWatch>;

    /// Имена всех известных топиков.
    async fn topics(&self) -> TidebusResult<Vec<String>>;
}
