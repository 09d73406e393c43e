use std::{path::PathBuf, sync::Arc, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use tidebus_error::{GenericError, StackError, StatusCode, TidebusResult};

use crate::{
    logging::LoggingConfig,
    pubsub::BrokerOptions,
    store::{EventStore, FileStore, MemoryStore, SyncPolicy},
    topic::validate_topic,
};

/// Пространство имён по умолчанию: базовый путь, под которым лежат все
/// топики.
pub const DEFAULT_NAMESPACE: &str = "graphql-firebase-subscriptions";

/// Префикс переменных окружения (`TIDEBUS__STORE__KIND=memory`).
pub const ENV_PREFIX: &str = "TIDEBUS";

/// Вид хранилища.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    #[default]
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub data_dir: PathBuf,
    pub namespace: String,
    pub sync: SyncPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::File,
            data_dir: PathBuf::from("data"),
            namespace: DEFAULT_NAMESPACE.to_string(),
            sync: SyncPolicy::EverySec,
        }
    }
}

impl StoreSettings {
    /// Открывает хранилище выбранного вида.
    pub fn open(&self) -> TidebusResult<Arc<dyn EventStore>> {
        Ok(match self.kind {
            StoreKind::Memory => Arc::new(MemoryStore::new()),
            StoreKind::File => Arc::new(FileStore::open(&self.data_dir, &self.namespace, self.sync)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub local_cache: bool,
    pub local_cache_ttl_ms: u64,
    pub local_cache_capacity: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        let defaults = BrokerOptions::default();
        Self {
            local_cache: defaults.local_cache,
            local_cache_ttl_ms: defaults.local_cache_ttl.as_millis() as u64,
            local_cache_capacity: defaults.local_cache_capacity,
        }
    }
}

impl From<&BrokerSettings> for BrokerOptions {
    fn from(s: &BrokerSettings) -> Self {
        Self {
            local_cache: s.local_cache,
            local_cache_ttl: Duration::from_millis(s.local_cache_ttl_ms),
            local_cache_capacity: s.local_cache_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    /// Записи старше этого возраста удаляются при очистке.
    pub max_age_ms: u64,
    /// Топики для очистки. Пустой список означает все топики хранилища.
    pub topics: Vec<String>,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            max_age_ms: 600_000,
            topics: Vec::new(),
        }
    }
}

impl RetentionSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Настройки шины.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub broker: BrokerSettings,
    pub retention: RetentionSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Значения по умолчанию → `tidebus.toml` (если есть) → окружение.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name("tidebus").required(false))
    }

    /// Значения по умолчанию → указанный файл → окружение.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path: PathBuf = path.into();
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("retention.topics"),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn validate(&self) -> TidebusResult<()> {
        let invalid = |msg: &str| StackError::new(GenericError::new(StatusCode::InvalidArgs, msg));

        if self.store.namespace.is_empty() {
            return Err(invalid("store.namespace must not be empty"));
        }
        validate_topic(&self.store.namespace)
            .map_err(|e| invalid(&format!("store.namespace: {e}")))?;
        if self.broker.local_cache_capacity == 0 {
            return Err(invalid("broker.local_cache_capacity must be positive"));
        }
        if self.retention.max_age_ms == 0 {
            return Err(invalid("retention.max_age_ms must be positive"));
        }
        for topic in &self.retention.topics {
            validate_topic(topic).map_err(|e| invalid(&format!("retention.topics: {e}")))?;
        }
        self.logging.validate()
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions::from(&self.broker)
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn test_defaults() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.store.namespace, DEFAULT_NAMESPACE);
        assert_eq!(settings.broker.local_cache_ttl_ms, 60);
        assert_eq!(settings.retention.max_age_ms, 600_000);
        assert!(settings.validate().is_ok());
    }

    /// Тест проверяет порядок источников: файл поверх значений по
    /// умолчанию, окружение поверх файла.
    #[test]
    #[serial]
    fn test_file_then_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[store]
kind = "memory"
namespace = "from-file"

[broker]
local_cache = true
"#
        )
        .unwrap();

        env::set_var("TIDEBUS__STORE__NAMESPACE", "from-env");
        env::set_var("TIDEBUS__RETENTION__TOPICS", "a,b");
        let settings = Settings::load_from(file.path());
        env::remove_var("TIDEBUS__STORE__NAMESPACE");
        env::remove_var("TIDEBUS__RETENTION__TOPICS");

        let settings = settings.unwrap();
        assert_eq!(settings.store.kind, StoreKind::Memory);
        assert_eq!(settings.store.namespace, "from-env");
        assert!(settings.broker.local_cache);
        assert_eq!(settings.retention.topics, vec!["a", "b"]);
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file_is_error() {
        assert!(Settings::load_from("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.broker.local_cache_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retention.max_age_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.store.namespace = "a/b".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_broker_options_conversion() {
        let settings = BrokerSettings {
            local_cache: true,
            local_cache_ttl_ms: 250,
            local_cache_capacity: 16,
        };
        let options = BrokerOptions::from(&settings);
        assert_eq!(options.local_cache_ttl, Duration::from_millis(250));
        assert_eq!(options.local_cache_capacity, 16);
    }

    #[test]
    fn test_memory_store_opens() {
        let settings = StoreSettings {
            kind: StoreKind::Memory,
            ..Default::default()
        };
        assert!(settings.open().is_ok());
    }
}
