use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки хранилища событий.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// Ошибка ввода-вывода
    #[error("io error ({kind:?}): {reason}")]
    Io {
        kind: std::io::ErrorKind,
        reason: String,
    },

    /// Журнал топика повреждён
    #[error("corrupted log {path} at offset {offset}: {reason}")]
    CorruptedLog {
        path: String,
        offset: u64,
        reason: String,
    },

    /// Ошибка сериализации записи
    #[error("serialization failed: {reason}")]
    SerializationFailed { reason: String },

    /// Ошибка десериализации записи
    #[error("deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    /// Хранилище недоступно
    #[error("storage unavailable: {reason}")]
    Unavailable { reason: String },

    /// Запись превышает допустимый размер
    #[error("record of {size} bytes exceeds limit of {limit} bytes")]
    RecordTooLarge { size: usize, limit: usize },
}

impl ErrorExt for StorageError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Io { kind, .. } => match kind {
                std::io::ErrorKind::NotFound => StatusCode::NotFound,
                std::io::ErrorKind::TimedOut => StatusCode::Timeout,
                std::io::ErrorKind::UnexpectedEof => StatusCode::UnexpectedEof,
                _ => StatusCode::Io,
            },
            Self::CorruptedLog { .. } => StatusCode::CorruptedData,
            Self::SerializationFailed { .. } => StatusCode::SerializationFailed,
            Self::DeserializationFailed { .. } => StatusCode::DeserializationFailed,
            Self::Unavailable { .. } => StatusCode::StorageUnavailable,
            Self::RecordTooLarge { .. } => StatusCode::SizeLimit,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::CorruptedLog { .. } => "Stored data is corrupted".to_string(),
            Self::Io { .. } => "Storage I/O error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: StorageError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.status_code(), StatusCode::NotFound);
        assert!(err.to_string().contains("gone"));
    }

    /// Детали повреждения не уходят потребителю, но остаются в логах.
    #[test]
    fn test_corruption_is_critical_and_hidden() {
        let err = StorageError::CorruptedLog {
            path: "/data/orders.log".into(),
            offset: 42,
            reason: "bad length".into(),
        };
        assert!(err.status_code().is_critical());
        assert_eq!(err.client_message(), "Stored data is corrupted");
        assert!(err.log_message().contains("/data/orders.log"));
    }
}
