use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tidebus_error::PubSubError;
use uuid::Uuid;

use crate::store::StoredEntry;

/// Событие, доставляемое подписчику.
///
/// Полезная нагрузка непрозрачна для шины и передаётся как есть.
/// `timestamp` ставится при публикации (миллисекунды Unix); события,
/// записанные сторонними писателями, могут его не иметь.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub key: String,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Event {
    /// Создаёт событие со свежим ключом и без метки времени.
    pub fn new(
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: Uuid::new_v4().to_string(),
            payload,
            timestamp: None,
        }
    }

    pub fn with_timestamp(
        mut self,
        timestamp_ms: i64,
    ) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    pub(crate) fn from_entry(
        topic: &str,
        entry: StoredEntry,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            key: entry.key,
            payload: entry.envelope.payload,
            timestamp: entry.envelope.timestamp,
        }
    }

    /// Событие опубликовано раньше момента `instant_ms`.
    ///
    /// Событие без метки времени никогда не считается старым.
    pub fn is_before(
        &self,
        instant_ms: i64,
    ) -> bool {
        matches!(self.timestamp, Some(ts) if ts < instant_ms)
    }

    /// Приводит полезную нагрузку к типу `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PubSubError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| PubSubError::PayloadDecode {
            reason: e.to_string(),
        })
    }
}
