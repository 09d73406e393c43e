use std::{any::Any, error::Error};

use crate::StatusCode;

/// Расширение для ошибок шины (object-safe).
///
/// Любая ошибка, которую можно положить в [`StackError`](crate::StackError),
/// реализует этот трейт:
/// - статус-код для классификации,
/// - безопасное сообщение для потребителя очереди,
/// - детализированное сообщение для логов,
/// - теги для метрик.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус ошибки. По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`], чтобы можно было выполнить downcast.
    fn as_any(&self) -> &dyn Any;

    /// Безопасное сообщение для внешнего потребителя.
    ///
    /// Для внутренних ошибок детали скрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Детализированное сообщение для логов (`Debug`-представление).
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Можно ли повторить операцию, приведшую к ошибке.
    fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }

    /// Набор тегов для систем наблюдаемости.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Короткое имя типа ошибки (без пути модулей).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, fmt};

    use super::*;

    #[derive(Debug)]
    struct OpaqueError(&'static str);

    impl fmt::Display for OpaqueError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "opaque: {}", self.0)
        }
    }

    impl Error for OpaqueError {}

    impl ErrorExt for OpaqueError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct TopicMissing(&'static str);

    impl fmt::Display for TopicMissing {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "topic missing: {}", self.0)
        }
    }

    impl Error for TopicMissing {}

    impl ErrorExt for TopicMissing {
        fn status_code(&self) -> StatusCode {
            StatusCode::NotFound
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что по умолчанию статус ошибки — `Internal`,
    /// а детали скрыты от потребителя.
    #[test]
    fn test_default_status_hides_details() {
        let e = OpaqueError("secret path");
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.client_message(), "Internal error");
        assert!(e.log_message().contains("secret path"));
    }

    #[test]
    fn test_client_message_for_data_error() {
        let e = TopicMissing("orders");
        assert_eq!(e.client_message(), "topic missing: orders");
        assert!(!e.is_retryable());
    }

    #[test]
    fn test_as_any_downcast() {
        let e = TopicMissing("x");
        let down = e.as_any().downcast_ref::<TopicMissing>();
        assert_eq!(down.map(|d| d.0), Some("x"));
    }

    /// Теги метрик содержат тип ошибки и статус-код.
    #[test]
    fn test_metrics_tags() {
        let tags = TopicMissing("t").metrics_tags();
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "error_type" && v.ends_with("TopicMissing")));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && v == &StatusCode::NotFound.to_string()));
    }
}
