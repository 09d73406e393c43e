use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Фильтр событий: `RUST_LOG`, если задан, иначе директива из конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    let directive = config.build_filter_directive();

    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => match EnvFilter::try_new(&directive) {
            Ok(filter) => filter,
            Err(e) => {
                eprintln!("Invalid log filter directive '{directive}': {e}; falling back to 'info'");
                EnvFilter::new("info")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    // Мини-буферный writer для тестов
    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriterGuard(self.0.clone())
        }
    }

    struct VecWriterGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriterGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn capture(
        config: &LoggingConfig,
        emit: impl FnOnce(),
    ) -> String {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let subscriber = Registry::default().with(build_filter_from_config(config)).with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(VecMakeWriter(buf.clone())),
        );
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = buf.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    /// Тест проверяет, что директива из конфигурации отсекает события ниже
    /// заданного уровня.
    #[test]
    #[serial]
    fn test_config_directive_filters_levels() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "warn".into(),
            ..Default::default()
        };
        let out = capture(&config, || {
            tracing::info!("hidden message");
            tracing::warn!("visible message");
        });
        assert!(!out.contains("hidden message"));
        assert!(out.contains("visible message"));
    }

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        env::set_var("RUST_LOG", "debug");
        let config = LoggingConfig {
            level: "error".into(),
            ..Default::default()
        };
        let out = capture(&config, || tracing::debug!("debug from env"));
        env::remove_var("RUST_LOG");
        assert!(out.contains("debug from env"));
    }

    #[test]
    #[serial]
    fn test_bad_directive_falls_back_to_info() {
        env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "tidebus=notalevel".into(),
            ..Default::default()
        };
        let out = capture(&config, || {
            tracing::debug!("debug dropped");
            tracing::info!("info kept");
        });
        assert!(!out.contains("debug dropped"));
        assert!(out.contains("info kept"));
    }
}
