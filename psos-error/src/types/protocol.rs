use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибки разбора пакетов MQTT и строк LAN-прокси.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Remaining Length закодирована более чем в 4 байтах
    #[error("malformed remaining length")]
    MalformedLength,

    #[error("unknown packet type {packet_type}")]
    UnknownPacketType { packet_type: u8 },

    #[error("invalid flags {flags:#06b} for packet type {packet_type}")]
    InvalidFlags { packet_type: u8, flags: u8 },

    #[error("packet truncated: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("packet of {size} bytes exceeds limit of {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("unsupported protocol '{name}' level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    #[error("invalid QoS bits {value}")]
    InvalidQos { value: u8 },

    #[error("invalid message: {reason}")]
    InvalidMessage { reason: String },
}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedLength => StatusCode::MalformedLength,
            Self::PacketTooLarge { .. } => StatusCode::SizeLimit,
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
            Self::UnsupportedProtocol { .. } => StatusCode::UnsupportedVersion,
            Self::InvalidQos { .. } => StatusCode::InvalidQos,
            Self::InvalidMessage { .. } => StatusCode::ProtocolError,
            _ => StatusCode::InvalidFrame,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
