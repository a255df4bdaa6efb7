use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Ошибка рукопожатия с брокером: разрешение адреса, TCP, TLS или CONNACK.
///
/// Менеджер соединения повторяет попытку до заданного предела, после чего
/// ошибка превращается в [`FatalConnectivityError`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportConnectError {
    #[error("failed to resolve broker host '{host}': {reason}")]
    Resolve { host: String, reason: String },

    #[error("connection to {address} failed: {reason}")]
    Refused { address: String, reason: String },

    #[error("connection to {address} timed out")]
    Timeout { address: String },

    #[error("TLS handshake failed: {reason}")]
    Tls { reason: String },

    /// Брокер ответил CONNACK с ненулевым кодом возврата
    #[error("broker rejected connection (code {code}): {reason}")]
    Rejected { code: u8, reason: String },

    #[error("protocol error during handshake: {reason}")]
    Protocol { reason: String },

    /// Сеть недоступна: подключение даже не начиналось
    #[error("network is unavailable")]
    NetworkUnavailable,
}

/// Ошибка ввода-вывода на установленном соединении (ping, приём, отправка).
///
/// Переводит менеджер в `Disconnected`; не эскалируется.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportIoError {
    #[error("connection closed by peer")]
    Closed,

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("{operation} failed: {reason}")]
    Io {
        operation: &'static str,
        reason: String,
    },

    #[error("protocol violation: {reason}")]
    Protocol { reason: String },
}

/// Исчерпаны попытки подключения. Единственная ошибка, которая покидает
/// менеджер соединения и превращается в запрос на перезапуск устройства.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to connect to broker after {attempts} attempts: {last_error}")]
pub struct FatalConnectivityError {
    pub attempts: u32,
    pub last_error: String,
}

impl TransportIoError {
    /// Создаёт `Io`-вариант из `std::io::Error`, различая EOF и таймауты.
    pub fn from_io(
        operation: &'static str,
        err: &std::io::Error,
    ) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Self::Closed,
            std::io::ErrorKind::TimedOut => Self::Timeout { operation },
            _ => Self::Io {
                operation,
                reason: err.to_string(),
            },
        }
    }
}

impl ErrorExt for TransportConnectError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Resolve { .. } => StatusCode::ResolveFailed,
            Self::Refused { .. } => StatusCode::ConnectionFailed,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Tls { .. } => StatusCode::TlsFailed,
            Self::Rejected { code, .. } => match code {
                1 => StatusCode::UnsupportedVersion,
                2 => StatusCode::IdentifierRejected,
                3 => StatusCode::BrokerUnavailable,
                4 => StatusCode::AuthFailed,
                5 => StatusCode::NotAuthorized,
                _ => StatusCode::ProtocolError,
            },
            Self::Protocol { .. } => StatusCode::ProtocolError,
            Self::NetworkUnavailable => StatusCode::ConnectionFailed,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "transport_connect".to_string()),
            ("status_code", self.status_code().to_string()),
        ];
        if let Self::Refused { address, .. } | Self::Timeout { address } = self {
            tags.push(("address", address.clone()));
        }
        tags
    }
}

impl ErrorExt for TransportIoError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Closed => StatusCode::ConnectionClosed,
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Io { .. } => StatusCode::Io,
            Self::Protocol { .. } => StatusCode::ProtocolError,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for FatalConnectivityError {
    fn status_code(&self) -> StatusCode {
        StatusCode::ConnectivityLost
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        "Broker unreachable, device reset requested".to_string()
    }
}
