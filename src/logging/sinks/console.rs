use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой согласно конфигурации.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    formatter::build_formatter_from_config(config, config.format, config.with_ansi)
}
