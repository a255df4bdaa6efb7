use thiserror::Error;
use tokio::sync::mpsc;

/// Ошибка при получении сообщений из очереди доставки.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    /// Все `QueueHandle` сброшены, новых сообщений не будет.
    #[error("delivery queue is closed")]
    Closed,

    #[error("operation exceeded the specified timeout")]
    Timeout,
}

/// Ошибка при неблокирующем получении сообщений.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryRecvError {
    #[error("no messages available")]
    Empty,

    #[error("delivery queue is closed")]
    Closed,
}

// === Преобразования ===

impl From<mpsc::error::TryRecvError> for TryRecvError {
    fn from(err: mpsc::error::TryRecvError) -> Self {
        match err {
            mpsc::error::TryRecvError::Empty => TryRecvError::Empty,
            mpsc::error::TryRecvError::Disconnected => TryRecvError::Closed,
        }
    }
}

impl From<TryRecvError> for RecvError {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => RecvError::Timeout,
            TryRecvError::Closed => RecvError::Closed,
        }
    }
}
