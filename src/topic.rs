use std::fmt;

use tidebus_error::PubSubError;

/// Максимальная длина имени топика в байтах.
pub const MAX_TOPIC_LEN: usize = 256;

/// Проверяет имя топика.
///
/// Имя топика используется как сегмент пути в хранилище (и как имя файла
/// журнала), поэтому допустимы только `[A-Za-z0-9_-]`, длина от 1 до
/// [`MAX_TOPIC_LEN`] байт.
pub fn validate_topic(topic: &str) -> Result<(), PubSubError> {
    let invalid = |reason: &str| PubSubError::InvalidTopic {
        topic: topic.to_string(),
        reason: reason.to_string(),
    };

    if topic.is_empty() {
        return Err(invalid("topic name is empty"));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(invalid("topic name is too long"));
    }
    if let Some(bad) = topic
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(invalid(&format!("character {bad:?} is not allowed")));
    }
    Ok(())
}

/// Один или несколько топиков, на которые подписывается очередь доставки.
///
/// Одиночный топик и список топиков обрабатываются одинаково: из любой
/// формы получается упорядоченный список имён. Проверка имён выполняется в
/// [`Topics::validated`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics(Vec<String>);

impl Topics {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Возвращает список имён, если он не пуст и каждое имя допустимо.
    pub fn validated(self) -> Result<Vec<String>, PubSubError> {
        if self.0.is_empty() {
            return Err(PubSubError::NoTopics);
        }
        for topic in &self.0 {
            validate_topic(topic)?;
        }
        Ok(self.0)
    }
}

impl fmt::Display for Topics {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

impl From<&str> for Topics {
    fn from(topic: &str) -> Self {
        Self(vec![topic.to_string()])
    }
}

impl From<String> for Topics {
    fn from(topic: String) -> Self {
        Self(vec![topic])
    }
}

impl From<&String> for Topics {
    fn from(topic: &String) -> Self {
        Self(vec![topic.clone()])
    }
}

impl From<Vec<String>> for Topics {
    fn from(topics: Vec<String>) -> Self {
        Self(topics)
    }
}

impl From<Vec<&str>> for Topics {
    fn from(topics: Vec<&str>) -> Self {
        Self(topics.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Topics {
    fn from(topics: &[&str]) -> Self {
        Self(topics.iter().map(|t| t.to_string()).collect())
    }
}

impl From<&[String]> for Topics {
    fn from(topics: &[String]) -> Self {
        Self(topics.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Topics {
    fn from(topics: [&str; N]) -> Self {
        Self(topics.iter().map(|t| t.to_string()).collect())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
