use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::sync::mpsc;

use super::Envelope;
use crate::{RecvError, TryRecvError};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Идентификатор очереди доставки. Уникален в пределах процесса.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueId(u64);

/// Сторона производителя очереди доставки.
///
/// Копируется свободно; сравнивается по идентичности очереди, а не по
/// содержимому. Именно этот хэндл передаётся в `subscribe`/`unsubscribe`.
#[derive(Clone)]
pub struct QueueHandle {
    id: QueueId,
    tx: mpsc::UnboundedSender<Envelope>,
}

/// Сторона потребителя: читается ровно одной задачей.
///
/// Порядок сообщений совпадает с порядком их отправки в очередь.
pub struct DeliveryQueue {
    id: QueueId,
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Создаёт новую неограниченную очередь доставки.
pub fn delivery_queue() -> (QueueHandle, DeliveryQueue) {
    let id = QueueId(NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed));
    let (tx, rx) = mpsc::unbounded_channel();
    (QueueHandle { id, tx }, DeliveryQueue { id, rx })
}

impl QueueId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueueId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

impl QueueHandle {
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Неблокирующая отправка. `false`, если потребитель уже сброшен.
    pub(crate) fn push(
        &self,
        envelope: Envelope,
    ) -> bool {
        self.tx.send(envelope).is_ok()
    }

    /// Сброшен ли `DeliveryQueue`.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for QueueHandle {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.id == other.id
    }
}

impl Eq for QueueHandle {}

impl Hash for QueueHandle {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.id.hash(state);
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DeliveryQueue {
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Ожидает следующее сообщение.
    ///
    /// # Возвращает
    /// - `Ok(Envelope)` при получении сообщения
    /// - `Err(RecvError::Closed)`, если все `QueueHandle` сброшены и очередь
    ///   пуста
    pub async fn recv(&mut self) -> Result<Envelope, RecvError> {
        self.rx.recv().await.ok_or(RecvError::Closed)
    }

    /// Как [`recv`](Self::recv), но не дольше `timeout`.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Envelope, RecvError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| RecvError::Timeout)?
    }

    /// Забирает сообщение без ожидания.
    pub fn try_recv(&mut self) -> Result<Envelope, TryRecvError> {
        self.rx.try_recv().map_err(Into::into)
    }

    /// Количество сообщений, ожидающих чтения.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Закрывает очередь: новые отправки отклоняются, уже поставленные
    /// сообщения остаются доступны для чтения.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl fmt::Debug for DeliveryQueue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("id", &self.id)
            .field("pending", &self.len())
            .finish()
    }
}
