use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки подсистемы pub/sub: брокер и очередь доставки.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PubSubError {
    /// Недопустимое имя топика
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// Список топиков пуст
    #[error("at least one topic is required")]
    NoTopics,

    /// Подписка на топик не удалась
    #[error("subscribe to '{topic}' failed: {reason}")]
    SubscribeFailed { topic: String, reason: String },

    /// Публикация не удалась
    #[error("publish to '{topic}' failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    /// Очередь доставки уже закрыта
    #[error("delivery queue is closed")]
    QueueClosed,

    /// Полезную нагрузку не удалось привести к ожидаемому типу
    #[error("payload decode failed: {reason}")]
    PayloadDecode { reason: String },
}

impl ErrorExt for PubSubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTopic { .. } | Self::NoTopics => StatusCode::InvalidTopic,
            Self::SubscribeFailed { .. } => StatusCode::SubscribeFailed,
            Self::PublishFailed { .. } => StatusCode::PublishFailed,
            Self::QueueClosed => StatusCode::QueueClosed,
            Self::PayloadDecode { .. } => StatusCode::DeserializationFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "pubsub".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::InvalidTopic { topic, .. }
            | Self::SubscribeFailed { topic, .. }
            | Self::PublishFailed { topic, .. } => {
                tags.push(("topic", topic.clone()));
            }
            _ => {}
        }

        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(PubSubError::QueueClosed.to_string(), "delivery queue is closed");
        assert_eq!(
            PubSubError::SubscribeFailed {
                topic: "a".into(),
                reason: "down".into()
            }
            .to_string(),
            "subscribe to 'a' failed: down"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PubSubError::NoTopics.status_code(), StatusCode::InvalidTopic);
        assert_eq!(
            PubSubError::PayloadDecode { reason: "x".into() }.status_code(),
            StatusCode::DeserializationFailed
        );
    }

    #[test]
    fn test_metrics_tags_carry_topic() {
        let tags = PubSubError::PublishFailed {
            topic: "orders".into(),
            reason: "io".into(),
        }
        .metrics_tags();
        assert!(tags.contains(&("topic", "orders".to_string())));
    }
}
