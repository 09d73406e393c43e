use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{fmt, layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Файловый слой с ежедневной ротацией и неблокирующей записью.
///
/// `WorkerGuard` нужно держать до завершения программы: при его drop
/// буфер сбрасывается на диск.
pub fn layer_with_config<S>(
    config: &LoggingConfig
) -> std::io::Result<(Box<dyn LayerTrait<S> + Send + Sync>, WorkerGuard)>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = rolling::daily(&config.log_dir, &config.file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer: Box<dyn LayerTrait<S> + Send + Sync> = match config.file_format {
        LogFormat::Json => Box::new(
            fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_ansi(false)
                .with_writer(writer),
        ),
        LogFormat::Pretty | LogFormat::Compact => Box::new(
            fmt::layer()
                .event_format(fmt::format().compact())
                .with_ansi(false)
                .with_writer(writer),
        ),
    };

    Ok((layer, guard))
}
