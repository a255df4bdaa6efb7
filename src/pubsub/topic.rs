//! Сопоставление топиков с фильтрами в семантике MQTT.
//!
//! Фильтр состоит из уровней, разделённых `/`. Уровень `+` совпадает ровно с
//! одним уровнем топика, `#` совпадает с текущим и всеми оставшимися уровнями
//! (в том числе с нулём уровней) и допустим только последним.

use std::{fmt, sync::Arc};

use psos_error::{InvalidFilterError, InvalidTopicError};

use super::intern_filter;

pub const LEVEL_SEPARATOR: char = '/';
pub const SINGLE_LEVEL_WILDCARD: &str = "+";
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Максимальная длина строки MQTT (2-байтовый префикс длины).
pub const MAX_TOPIC_LEN: usize = u16::MAX as usize;

/// Проверенный фильтр подписки.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(Arc<str>);

/// Совпадает ли `topic` с `filter`.
///
/// Функция не проверяет корректность аргументов: для некорректного фильтра
/// результат определён, но не имеет смысла. Проверка выполняется при
/// подписке.
pub fn matches(
    filter: &str,
    topic: &str,
) -> bool {
    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Проверяет фильтр подписки.
pub fn validate_filter(filter: &str) -> Result<(), InvalidFilterError> {
    if filter.is_empty() {
        return Err(InvalidFilterError::Empty);
    }
    if filter.len() > MAX_TOPIC_LEN {
        return Err(InvalidFilterError::TooLong {
            len: filter.len(),
            max: MAX_TOPIC_LEN,
        });
    }

    let mut levels = filter.split(LEVEL_SEPARATOR).peekable();
    while let Some(level) = levels.next() {
        if level.is_empty() {
            return Err(InvalidFilterError::EmptySegment {
                filter: filter.to_string(),
            });
        }
        if level == MULTI_LEVEL_WILDCARD {
            if levels.peek().is_some() {
                return Err(InvalidFilterError::MisplacedMultiLevel {
                    filter: filter.to_string(),
                });
            }
            continue;
        }
        if level != SINGLE_LEVEL_WILDCARD && has_wildcard(level) {
            return Err(InvalidFilterError::MixedWildcard {
                filter: filter.to_string(),
                level: level.to_string(),
            });
        }
    }
    Ok(())
}

/// Проверяет топик публикации: непустые уровни, без wildcard-символов.
pub fn validate_topic(topic: &str) -> Result<(), InvalidTopicError> {
    if topic.is_empty() {
        return Err(InvalidTopicError::Empty {
            topic: topic.to_string(),
        });
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(InvalidTopicError::TooLong {
            len: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }
    if has_wildcard(topic) {
        return Err(InvalidTopicError::Wildcard {
            topic: topic.to_string(),
        });
    }
    if topic.split(LEVEL_SEPARATOR).any(str::is_empty) {
        return Err(InvalidTopicError::EmptySegment {
            topic: topic.to_string(),
        });
    }
    Ok(())
}

#[inline]
fn has_wildcard(s: &str) -> bool {
    s.contains(['+', '#'])
}

impl TopicFilter {
    /// Проверяет фильтр и интернирует его строку.
    pub fn parse(filter: &str) -> Result<Self, InvalidFilterError> {
        validate_filter(filter)?;
        Ok(Self(intern_filter(filter)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Общая строка фильтра; одна на все конверты этого фильтра.
    pub fn as_shared(&self) -> &Arc<str> {
        &self.0
    }

    pub fn matches(
        &self,
        topic: &str,
    ) -> bool {
        matches(&self.0, topic)
    }

    /// Содержит ли фильтр `+` или `#`.
    pub fn is_wildcard(&self) -> bool {
        has_wildcard(&self.0)
    }
}

impl fmt::Debug for TopicFilter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("TopicFilter").field(&&*self.0).finish()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TopicFilter {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for TopicFilter {
    type Error = InvalidFilterError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}
