use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Некорректный фильтр топика. Возвращается синхронно из `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidFilterError {
    /// Пустая строка фильтра
    #[error("topic filter is empty")]
    Empty,
    /// Один из уровней фильтра пуст (`a//b`, `/a`, `a/`)
    #[error("topic filter '{filter}' contains an empty level")]
    EmptySegment { filter: String },
    /// `#` стоит не последним уровнем
    #[error("'#' must be the last level of topic filter '{filter}'")]
    MisplacedMultiLevel { filter: String },
    /// Уровень смешивает wildcard с другими символами (`a+`, `#b`)
    #[error("level '{level}' of topic filter '{filter}' mixes a wildcard with other characters")]
    MixedWildcard { filter: String, level: String },
    /// Превышена максимальная длина
    #[error("topic filter is {len} bytes long, max is {max}")]
    TooLong { len: usize, max: usize },
}

/// Некорректный топик публикации.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTopicError {
    #[error("topic '{topic}' is empty")]
    Empty { topic: String },
    #[error("topic '{topic}' contains an empty level")]
    EmptySegment { topic: String },
    /// Публикуемый топик не может содержать `+` или `#`
    #[error("topic '{topic}' contains a wildcard character")]
    Wildcard { topic: String },
    #[error("topic is {len} bytes long, max is {max}")]
    TooLong { len: usize, max: usize },
}

/// QoS вне диапазона `0..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid QoS level {value}, expected 0, 1 or 2")]
pub struct InvalidQosError {
    pub value: u8,
}

impl ErrorExt for InvalidFilterError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLong { .. } => StatusCode::SizeLimit,
            _ => StatusCode::InvalidFilter,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "invalid_filter".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        match self {
            Self::EmptySegment { filter }
            | Self::MisplacedMultiLevel { filter }
            | Self::MixedWildcard { filter, .. } => tags.push(("filter", filter.clone())),
            _ => {}
        }
        tags
    }
}

impl ErrorExt for InvalidTopicError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::TooLong { .. } => StatusCode::SizeLimit,
            _ => StatusCode::InvalidTopic,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for InvalidQosError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidQos
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_display() {
        let err = InvalidFilterError::MisplacedMultiLevel {
            filter: "a/#/b".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "'#' must be the last level of topic filter 'a/#/b'"
        );
        assert_eq!(err.status_code(), StatusCode::InvalidFilter);
    }

    #[test]
    fn test_filter_error_tags_carry_filter() {
        let err = InvalidFilterError::MixedWildcard {
            filter: "a/b+".to_string(),
            level: "b+".to_string(),
        };
        let tags = err.metrics_tags();
        assert!(tags.contains(&("filter", "a/b+".to_string())));
    }

    #[test]
    fn test_too_long_maps_to_size_limit() {
        let err = InvalidTopicError::TooLong { len: 70000, max: 65535 };
        assert_eq!(err.status_code(), StatusCode::SizeLimit);
    }

    #[test]
    fn test_qos_error() {
        let err = InvalidQosError { value: 3 };
        assert_eq!(err.status_code(), StatusCode::InvalidQos);
        assert!(err.to_string().contains('3'));
    }
}
