use std::{fmt, sync::Arc};

use bytes::Bytes;
use psos_error::InvalidQosError;
use serde::{Deserialize, Serialize};

/// Уровень качества обслуживания MQTT.
///
/// Маршрутизатор не интерпретирует QoS: значение передаётся транспорту как
/// есть.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

/// Сообщение, доставленное в очередь подписчика.
///
/// Подписчик не различает локальные и пришедшие от брокера сообщения.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Фильтр подписки, с которым совпал топик.
    pub filter: Arc<str>,
    pub topic: Arc<str>,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(
        filter: Arc<str>,
        topic: Arc<str>,
        payload: Bytes,
    ) -> Self {
        Self {
            filter,
            topic,
            payload,
        }
    }

    /// Полезная нагрузка как UTF-8, с заменой некорректных байт.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

impl QoS {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = InvalidQosError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            _ => Err(InvalidQosError { value }),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.as_u8()
    }
}

impl fmt::Display for QoS {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}
