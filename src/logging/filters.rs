use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// `RUST_LOG` имеет приоритет над конфигурацией; некорректная директива из
/// конфигурации заменяется на `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }

    let directive = config.build_filter_directive();
    match EnvFilter::try_new(&directive) {
        Ok(filter) => filter,
        Err(e) => {
            eprintln!("Invalid log filter directive from config ('{directive}'): {e}; falling back to 'info'");
            EnvFilter::new("info")
        }
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

    /// Уровень из конфигурации применяется к крейту, зависимости режутся до
    /// `dependency_level`.
    #[test]
    #[serial]
    fn test_config_directive_filters_levels() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "warn".into(),
            ..Default::default()
        };

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let layer = fmt::layer()
            .with_writer(VecMakeWriter(buffer.clone()))
            .with_filter(build_filter_from_config(&cfg));
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));

        tracing::info!("uplink state changed");
        tracing::warn!("connect attempt failed");
        tracing::warn!(target: "some_dependency", "noisy dependency warning");
        tracing::error!(target: "some_dependency", "dependency error");

        let out = buffer.lock().unwrap();
        let s = String::from_utf8_lossy(&out);
        assert!(s.contains("connect attempt failed"));
        assert!(!s.contains("uplink state changed"));
        assert!(s.contains("noisy dependency warning"));
        assert!(s.contains("dependency error"));
    }

    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig {
            level: "this_is_invalid_directive!!".into(),
            ..Default::default()
        };
        assert!(EnvFilter::try_new(cfg.build_filter_directive()).is_err());
        let _filter = build_filter_from_config(&cfg);
    }

    #[test]
    #[serial]
    fn test_rust_log_wins() {
        env::set_var("RUST_LOG", "psos=trace");
        let filter = build_filter_from_config(&LoggingConfig::default());
        env::remove_var("RUST_LOG");
        assert!(filter.to_string().contains("psos=trace"));
    }
}
