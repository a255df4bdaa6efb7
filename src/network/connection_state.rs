use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;

/// Состояние соединения с удалённым брокером.
///
/// Переходы выполняет только менеджер соединения; остальные компоненты
/// читают состояние через `watch`-канал.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Нет соединения. Публикации доставляются локально.
    #[default]
    Disconnected,
    /// Идёт рукопожатие (TCP, TLS, CONNECT/CONNACK).
    Connecting,
    /// Соединение установлено, подписки отправлены брокеру.
    Connected,
}

/// Потокобезопасная статистика соединения.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Успешные рукопожатия
    pub connects: AtomicU64,
    /// Неудачные попытки подключения
    pub connect_failures: AtomicU64,
    /// Обрывы установленного соединения
    pub disconnects: AtomicU64,
    /// Отправленные PINGREQ
    pub pings: AtomicU64,
    /// Сообщения, полученные от брокера
    pub inbound: AtomicU64,
    /// Сообщения, переданные брокеру
    pub published: AtomicU64,
    /// Публикации, доставленные локально вместо брокера
    pub local_fallbacks: AtomicU64,
}

/// Снимок статистики для логов и баннера.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub connects: u64,
    pub connect_failures: u64,
    pub disconnects: u64,
    pub pings: u64,
    pub inbound: u64,
    pub published: u64,
    pub local_fallbacks: u64,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        state: ConnectionState,
    ) -> ConnectionSnapshot {
        ConnectionSnapshot {
            state,
            connects: self.connects.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            pings: self.pings.load(Ordering::Relaxed),
            inbound: self.inbound.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            local_fallbacks: self.local_fallbacks.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
