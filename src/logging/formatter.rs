use std::io::{self, Stderr};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Консольный слой по конфигурации.
///
/// Возвращаем boxed trait-объект, чтобы стереть конкретный тип формата
/// (json/pretty/compact). Пишем в stderr: stdout занят выводом CLI.
pub fn build_formatter_from_config<S>(
    config: &LoggingConfig,
    format: LogFormat,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stderr = io::stderr;

    match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_writer(writer)
                .with_ansi(false)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids);
            Box::new(layer)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids);
            Box::new(layer)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(config.with_target)
                .with_thread_ids(config.with_thread_ids);
            Box::new(layer)
        }
    }
}
