//! Логирование на `tracing`: консольный слой в выбранном формате и
//! опциональный файловый слой с ежедневной ротацией.

pub mod config;
mod filters;
mod formatter;
pub mod handle;
pub mod sinks;

pub use config::{LogFormat, LoggingConfig};
pub use handle::LoggingHandle;
use tidebus_error::{GenericError, ResultExt, StackError, StatusCode, TidebusResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

/// Инициализация логирования с конфигурацией.
///
/// Устанавливает глобальный подписчик, поэтому повторный вызов в том же
/// процессе возвращает ошибку.
pub fn init_logging(mut config: LoggingConfig) -> TidebusResult<LoggingHandle> {
    config.apply_env_overrides();
    config.validate()?;
    config.ensure_log_dir().context("create log directory")?;

    let env_filter = filters::build_filter_from_config(&config);
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_enabled {
        layers.push(sinks::console::layer_with_config(&config));
    }

    let file_guard = if config.file_enabled {
        let (file_layer, guard) =
            sinks::file::layer_with_config(&config).context("open log file")?;
        layers.push(file_layer);
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| {
            StackError::new(GenericError::new(
                StatusCode::Internal,
                format!("install tracing subscriber: {e}"),
            ))
        })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_level = %config.level,
        format = ?config.format,
        console_enabled = config.console_enabled,
        file_enabled = config.file_enabled,
        log_dir = %config.log_dir.display(),
        "Logging system initialized"
    );

    Ok(LoggingHandle::new(file_guard))
}
