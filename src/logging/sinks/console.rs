use std::io::{self, Stdout};

use tracing_subscriber::{layer::Layer as LayerTrait, registry::LookupSpan};

use crate::logging::{config::LoggingConfig, formatter};

/// Консольный слой по настройкам `[logging.console]`.
pub fn layer_with_config<S>(config: &LoggingConfig) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let writer: fn() -> Stdout = io::stdout;
    formatter::build_formatter(
        &config.console,
        config.console_format(),
        config.console.with_ansi,
        writer,
    )
}

#[cfg(test)]
mod tests {
    use tracing::info;
    use tracing_subscriber::{prelude::*, registry::Registry};

    use super::*;
    use crate::logging::config::{ConsoleConfig, LogFormat};

    /// Слой строится и работает при любой комбинации формата и ANSI.
    #[test]
    fn test_layer_with_config_various_flags() {
        for format in [LogFormat::Json, LogFormat::Pretty, LogFormat::Compact] {
            for with_ansi in [true, false] {
                let cfg = LoggingConfig {
                    console: ConsoleConfig {
                        format,
                        with_ansi,
                        ..Default::default()
                    },
                    ..Default::default()
                };
                let subscriber = Registry::default().with(layer_with_config::<Registry>(&cfg));
                tracing::subscriber::with_default(subscriber, || {
                    info!(?format, with_ansi, "console layer smoke test");
                });
            }
        }
    }
}
