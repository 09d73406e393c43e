use std::{env, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};
use tidebus_error::{GenericError, StackError, StatusCode};
use tracing_subscriber::EnvFilter;

/// Формат вывода логов.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень или директива `EnvFilter` (`info`, `tidebus=debug,warn`).
    pub level: String,
    /// Формат консольного вывода.
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    /// Писать ли логи в файл с ежедневной ротацией.
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    /// Префикс имени файла логов.
    pub file_prefix: String,
    /// Формат файлового вывода.
    pub file_format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            console_enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_prefix: "tidebus.log".to_string(),
            file_format: LogFormat::Json,
        }
    }
}

impl LoggingConfig {
    /// Применяет переопределения из переменных окружения
    /// `TIDEBUS_LOG_LEVEL`, `TIDEBUS_LOG_FORMAT`, `TIDEBUS_LOG_DIR`.
    ///
    /// Некорректный формат игнорируется с предупреждением в stderr:
    /// подписчик ещё не установлен.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("TIDEBUS_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("TIDEBUS_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.format = format,
                Err(e) => eprintln!("Ignoring TIDEBUS_LOG_FORMAT: {e}"),
            }
        }
        if let Ok(dir) = env::var("TIDEBUS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
            self.file_enabled = true;
        }
    }

    /// Директива для `EnvFilter`.
    pub fn build_filter_directive(&self) -> String {
        self.level.trim().to_string()
    }

    pub fn validate(&self) -> Result<(), StackError> {
        let invalid = |msg: String| StackError::new(GenericError::new(StatusCode::InvalidArgs, msg));

        let directive = self.build_filter_directive();
        if directive.is_empty() {
            return Err(invalid("log level must not be empty".to_string()));
        }
        EnvFilter::try_new(&directive)
            .map_err(|e| invalid(format!("invalid log filter '{directive}': {e}")))?;

        if self.file_enabled && self.file_prefix.trim().is_empty() {
            return Err(invalid("log file prefix must not be empty".to_string()));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file_enabled {
            std::fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }
}
