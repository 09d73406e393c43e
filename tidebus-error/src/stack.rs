use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// Основная структура ошибки с поддержкой контекста и трассировки.
///
/// Клонирование дешёвое (`Arc`), поэтому одну и ту же ошибку можно отдать
/// нескольким ожидающим потребителям.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

/// Контекст ошибки с location tracking.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    /// Создаёт новую ошибку.
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        let mut new_contexts = (*self.contexts).clone();
        new_contexts.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self.contexts = Arc::new(new_contexts);
        self
    }

    /// Возвращает код статуса.
    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    /// Возвращает сообщение для потребителя.
    pub fn client_message(&self) -> String {
        self.inner.client_message()
    }

    /// Возвращает корневую ошибку.
    pub fn root(&self) -> &dyn ErrorExt {
        self.inner.as_ref()
    }

    /// Возвращает все контексты.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.inner.metrics_tags()
    }

    /// Попытка downcast к конкретному типу ошибки.
    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// `true`, если обе ошибки указывают на один и тот же корневой объект.
    ///
    /// Клоны одной ошибки равны, независимо от добавленных контекстов.
    pub fn same_root(
        &self,
        other: &StackError,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn is_critical(&self) -> bool {
        self.status_code().is_critical()
    }

    fn format_contexts(&self) -> Vec<String> {
        self.contexts
            .iter()
            .map(|ctx| match ctx.location {
                Some(loc) => format!("{} ({}:{})", ctx.message, loc.file(), loc.line()),
                None => ctx.message.clone(),
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());

        if !self.contexts.is_empty() {
            debug.field("contexts", &self.format_contexts());
        }

        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if self.contexts.is_empty() {
            write!(f, "{}", self.inner)
        } else {
            let contexts: Vec<&str> = self.contexts.iter().map(|c| c.message.as_str()).collect();
            write!(f, "{}: {}", contexts.join(" → "), self.inner)
        }
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
