use std::{env, fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::ConfigError;

/// Формат вывода в консоль.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    pub filename: String,
    /// JSON вместо текстового формата
    pub json: bool,
}

/// Конфигурация логирования. Секция `[logging]` файла настроек.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень для крейта `psos`: trace, debug, info, warn, error
    pub level: String,
    /// Уровень для остальных крейтов
    pub dependency_level: String,
    pub log_dir: PathBuf,
    pub console_enabled: bool,
    pub file_enabled: bool,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: LogFormat::Compact,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filename: "psos.log".to_string(),
            json: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dependency_level: "warn".to_string(),
            log_dir: PathBuf::from("logs"),
            console_enabled: true,
            file_enabled: false,
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

impl LoggingConfig {
    /// Переопределения из окружения: `PSOS_LOG_LEVEL`, `PSOS_LOG_DIR`,
    /// `PSOS_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("PSOS_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(dir) = env::var("PSOS_LOG_DIR") {
            self.log_dir = PathBuf::from(dir);
        }
        if let Ok(format) = env::var("PSOS_LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.console.format = LogFormat::Json,
                "pretty" => self.console.format = LogFormat::Pretty,
                "compact" => self.console.format = LogFormat::Compact,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("logging.level", &self.level),
            ("logging.dependency_level", &self.dependency_level),
        ] {
            if value.parse::<Level>().is_err() {
                return Err(ConfigError::invalid(key, format!("unknown level '{value}'")));
            }
        }
        if self.file_enabled && self.file.filename.trim().is_empty() {
            return Err(ConfigError::invalid("logging.file.filename", "must not be empty"));
        }
        Ok(())
    }

    /// Создаёт каталог логов, если включён файловый вывод.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file_enabled && self.file.enabled {
            fs::create_dir_all(&self.log_dir)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`, например `warn,psos=debug`.
    pub fn build_filter_directive(&self) -> String {
        format!(
            "{},{}={}",
            self.dependency_level,
            env!("CARGO_CRATE_NAME"),
            self.level
        )
    }

    pub fn console_format(&self) -> LogFormat {
        self.console.format
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_filter_directive() {
        let cfg = LoggingConfig {
            level: "debug".into(),
            ..Default::default()
        };
        assert_eq!(cfg.build_filter_directive(), "warn,psos=debug");
    }

    #[test]
    fn test_validate_rejects_unknown_level() {
        let cfg = LoggingConfig {
            level: "loud".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));
        assert!(LoggingConfig::default().validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        env::set_var("PSOS_LOG_LEVEL", "trace");
        env::set_var("PSOS_LOG_FORMAT", "JSON");
        let mut cfg = LoggingConfig::default();
        cfg.apply_env_overrides();
        env::remove_var("PSOS_LOG_LEVEL");
        env::remove_var("PSOS_LOG_FORMAT");

        assert_eq!(cfg.level, "trace");
        assert_eq!(cfg.console_format(), LogFormat::Json);
    }

    #[test]
    fn test_ensure_log_dir_only_when_file_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = LoggingConfig {
            log_dir: tmp.path().join("nested/logs"),
            ..Default::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(!cfg.log_dir.exists());

        cfg.file_enabled = true;
        cfg.ensure_log_dir().unwrap();
        assert!(cfg.log_dir.is_dir());
    }
}
