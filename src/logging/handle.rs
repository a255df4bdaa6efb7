use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing_appender::non_blocking::WorkerGuard;

/// Счётчики жизненного цикла логирования.
#[derive(Debug, Default)]
pub struct LoggingMetrics {
    pub flush_count: AtomicU64,
    pub shutdown_in_progress: AtomicBool,
}

/// Владеет `WorkerGuard` файлового вывода.
///
/// Держите хэндл до конца `main` и вызовите `shutdown`, чтобы дописать
/// буферизованные записи.
pub struct LoggingHandle {
    file_guard: Option<WorkerGuard>,
    pub metrics: Arc<LoggingMetrics>,
    flush_timeout: Duration,
}

impl LoggingMetrics {
    pub fn record_flush(&self) {
        self.flush_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_count(&self) -> u64 {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn is_shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }

    fn start_shutdown(&self) {
        self.shutdown_in_progress.store(true, Ordering::Release);
    }
}

impl LoggingHandle {
    pub fn new(file_guard: Option<WorkerGuard>) -> Self {
        Self {
            file_guard,
            metrics: Arc::new(LoggingMetrics::default()),
            flush_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_flush_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn has_file_sink(&self) -> bool {
        self.file_guard.is_some()
    }

    /// Закрывает файловый вывод. Сброс буфера выполняется при drop guard-а.
    pub fn shutdown(mut self) {
        self.metrics.start_shutdown();
        tracing::info!(file_sink = self.has_file_sink(), "Logging shutdown");

        let start = std::time::Instant::now();
        if self.file_guard.take().is_some() {
            self.metrics.record_flush();
        }

        let elapsed = start.elapsed();
        if elapsed > self.flush_timeout {
            eprintln!(
                "WARNING: Logging shutdown took {}ms (timeout: {}ms)",
                elapsed.as_millis(),
                self.flush_timeout.as_millis()
            );
        }
    }

    /// Как [`shutdown`](Self::shutdown), но сброс выполняется в блокирующем
    /// потоке и ограничен по времени.
    pub async fn shutdown_async(mut self) {
        self.metrics.start_shutdown();
        let timeout = self.flush_timeout;
        let guard = self.file_guard.take();
        let had_guard = guard.is_some();

        match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || drop(guard))).await {
            Ok(Ok(())) => {
                if had_guard {
                    self.metrics.record_flush();
                }
            }
            Ok(Err(e)) => eprintln!("Logging shutdown task panicked: {e}"),
            Err(_) => eprintln!(
                "WARNING: Logging shutdown exceeded timeout of {}ms",
                timeout.as_millis()
            ),
        }
    }
}

impl Drop for LoggingHandle {
    fn drop(&mut self) {
        if self.file_guard.is_some() && !self.metrics.is_shutdown_in_progress() {
            eprintln!("WARNING: LoggingHandle dropped without shutdown(); some logs may be lost");
        }
    }
}
