use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 4xxx: Ограничения
/// - 5xxx: Хранилище
/// - 6xxx: IO
/// - 9xxx: Pub/Sub и очередь доставки
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    Cancelled = 1006,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    InvalidData = 2009,

    // === 4xxx: Ограничения ===
    SizeLimit = 4004,

    // === 5xxx: Хранилище ===
    StorageUnavailable = 5000,
    CorruptedData = 5002,
    SerializationFailed = 5003,
    DeserializationFailed = 5004,

    // === 6xxx: IO ===
    Io = 6000,
    Timeout = 6002,
    UnexpectedEof = 6007,

    // === 9xxx: Pub/Sub ===
    InvalidTopic = 9000,
    SubscribeFailed = 9001,
    PublishFailed = 9002,
    QueueClosed = 9003,
    ConsumerAborted = 9004,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Возвращает `None`, если значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Сама шина повторов не делает: решение остаётся за вызывающим кодом
    /// или за реализацией хранилища.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::StorageUnavailable
                | Self::SubscribeFailed
                | Self::PublishFailed
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка со стороны клиента: проблема в запросе или данных.
    ///
    /// Диапазоны `2xxx..4xxx`, плюс `InvalidArgs` и `InvalidTopic`.
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=4999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs | Self::InvalidTopic)
    }

    /// Ошибка сервера: внутренняя или инфраструктурная (`1xxx`, `5xxx..6xxx`).
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 5000..=6999)
    }

    /// Ошибка подсистемы pub/sub (диапазон 9xxx).
    pub fn is_pubsub_error(&self) -> bool {
        (9000..=9999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::CorruptedData | Self::StorageUnavailable
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::QueueClosed => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidData
            | Self::InvalidTopic
            | Self::ConsumerAborted
            | Self::Cancelled => LogLevel::Info,
            Self::Timeout | Self::UnexpectedEof => LogLevel::Warn,
            Self::Internal | Self::CorruptedData | Self::StorageUnavailable => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
