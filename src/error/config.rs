use std::any::Any;

use psos_error::{ErrorExt, StatusCode};
use thiserror::Error;

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Ошибка слоя `config` (чтение файла, переменных окружения, десериализация).
    #[error("failed to load settings: {0}")]
    Load(#[from] ::config::ConfigError),

    /// Значение загружено, но не проходит проверку.
    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    /// Не удалось прочитать или разобрать файл сертификата.
    #[error("failed to read CA certificate '{path}': {reason}")]
    Certificate { path: String, reason: String },
}

impl ConfigError {
    pub fn invalid(
        key: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Load(::config::ConfigError::NotFound(_)) => StatusCode::MissingConfig,
            Self::Certificate { .. } => StatusCode::TlsFailed,
            _ => StatusCode::InvalidConfig,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
