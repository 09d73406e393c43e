pub mod pubsub;
pub mod storage;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use pubsub::*;
pub use storage::*;

use crate::{ErrorExt, StatusCode};

/// Универсальная ошибка с кодом и сообщением.
///
/// Удобна, когда отдельный тип ошибки избыточен: например, потребитель
/// очереди прерывает чтение со своей причиной.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for crate::StackError {
    fn from(err: std::io::Error) -> Self {
        crate::StackError::new(StorageError::from(err))
    }
}

/// Конвертация из std::str::Utf8Error
impl From<std::str::Utf8Error> for crate::StackError {
    fn from(err: std::str::Utf8Error) -> Self {
        crate::StackError::new(GenericError::new(
            StatusCode::InvalidData,
            format!("UTF-8 decoding failed: {err}"),
        ))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
