use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "serde_repr")]
use serde_repr::{Deserialize_repr, Serialize_repr};
#[cfg(feature = "strum")]
use strum_macros::{AsRefStr, EnumIter};

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки маршрутизации (топики, фильтры, очереди)
/// - 3xxx: Авторизация на брокере
/// - 4xxx: Конфигурация
/// - 6xxx: Сеть / IO
/// - 7xxx: Связность (фатальные состояния)
/// - 8xxx: Протокольные ошибки
///
/// # Реализация:
/// - `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`.
/// - опционально: `strum` для `AsRefStr`/`EnumIter` (feature = "strum").
/// - опционально: `serde_repr` для сериализации в виде числового значения
///   (feature = "serde_repr").
#[cfg_attr(feature = "strum", derive(AsRefStr, EnumIter))]
#[cfg_attr(feature = "serde_repr", derive(Serialize_repr, Deserialize_repr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    NotImplemented = 1005,

    // === 2xxx: Маршрутизация ===
    InvalidTopic = 2000,
    InvalidFilter = 2001,
    InvalidQos = 2002,
    InvalidPayload = 2003,
    QueueClosed = 2004,
    NotFound = 2005,

    // === 3xxx: Авторизация на брокере ===
    AuthFailed = 3000,
    NotAuthorized = 3001,
    IdentifierRejected = 3002,

    // === 4xxx: Конфигурация ===
    InvalidConfig = 4000,
    MissingConfig = 4001,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    ResolveFailed = 6004,
    TlsFailed = 6005,
    BrokerUnavailable = 6006,
    UnexpectedEof = 6007,

    // === 7xxx: Связность ===
    ConnectivityLost = 7000,
    ResetRequested = 7001,

    // === 8xxx: Протокол ===
    ProtocolError = 8000,
    InvalidFrame = 8001,
    UnsupportedVersion = 8002,
    InvalidUtf8 = 8003,
    SizeLimit = 8004,
    MalformedLength = 8005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Возвращает `None`, если значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с этим кодом имеет смысл повторить.
    ///
    /// Именно эти коды менеджер соединения считает временными сбоями
    /// рукопожатия с брокером.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ConnectionFailed
                | Self::ConnectionClosed
                | Self::ResolveFailed
                | Self::BrokerUnavailable
                | Self::UnexpectedEof
                | Self::Io
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающей стороны: плохой топик, фильтр, конфигурация.
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=4999).contains(&c) {
            return true;
        }
        matches!(self, Self::InvalidArgs)
    }

    /// Внутренняя или инфраструктурная ошибка (диапазоны `1xxx`, `6xxx..7xxx`).
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 6000..=7999)
    }

    /// Сетевая ошибка (диапазон 6xxx).
    pub fn is_network_error(&self) -> bool {
        (6000..=6999).contains(&self.code())
    }

    /// Ошибка протокола или разбора пакетов (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Self::Internal | Self::ConnectivityLost | Self::ResetRequested
        )
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::QueueClosed => LogLevel::Debug,
            Self::InvalidTopic
            | Self::InvalidFilter
            | Self::InvalidQos
            | Self::InvalidPayload
            | Self::InvalidArgs => LogLevel::Info,
            Self::Timeout | Self::ConnectionClosed | Self::ConnectionFailed => LogLevel::Warn,
            Self::Internal | Self::ConnectivityLost | Self::ResetRequested => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
