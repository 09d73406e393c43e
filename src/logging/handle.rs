use std::time::{Duration, Instant};

use tracing_appender::non_blocking::WorkerGuard;

/// Handle для управления lifecycle логирования.
///
/// Держит guard файлового writer-а: пока handle жив, фоновый поток пишет
/// логи в файл.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    /// Timeout для flush при shutdown (по умолчанию 5 секунд)
    flush_timeout: Duration,
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            flush_timeout: Duration::from_secs(5),
        }
    }

    /// Устанавливает custom flush timeout.
    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Включён ли файловый вывод.
    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Сбрасывает буферы и завершает файловый writer.
    pub fn shutdown(mut self) {
        let start = Instant::now();
        drop(self.file_guard.take());
        let elapsed = start.elapsed();

        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }
}

impl std::fmt::Debug for LoggingHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LoggingHandle")
            .field("file_sink", &self.has_file_sink())
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
