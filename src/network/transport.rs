//! Границы между менеджером соединения и конкретным транспортом.
//!
//! Менеджер работает только с этими трейтами, поэтому MQTT-клиент, клиент
//! LAN-прокси и тестовые заглушки взаимозаменяемы.

use async_trait::async_trait;
use bytes::Bytes;
use psos_error::{TransportConnectError, TransportIoError};
use tokio::sync::watch;

use crate::pubsub::QoS;

/// Сообщение, полученное от брокера.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Установленное соединение с брокером.
///
/// Любая ошибка означает, что соединение потеряно: менеджер сбрасывает
/// транспорт и переходит в `Disconnected`.
#[async_trait]
pub trait Transport: Send {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportIoError>;

    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> Result<(), TransportIoError>;

    /// Проверка живости соединения.
    async fn ping(&mut self) -> Result<(), TransportIoError>;

    /// Следующее уже полученное сообщение, без ожидания новых данных.
    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, TransportIoError>;

    /// Корректное закрытие. Ошибки игнорируются.
    async fn disconnect(&mut self);
}

/// Фабрика соединений.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportConnectError>;

    /// Адрес брокера для логов.
    fn endpoint(&self) -> String;
}

/// Источник сведений о доступности сети (Wi-Fi, Ethernet, модем).
pub trait NetworkMonitor: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Сеть считается доступной всегда.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

/// Доступность сети, которую выставляет внешний сервис связи.
#[derive(Debug, Clone)]
pub struct LinkMonitor {
    rx: watch::Receiver<bool>,
}

/// Создаёт монитор и управляющий им `watch::Sender`.
pub fn link_monitor(initially_up: bool) -> (watch::Sender<bool>, LinkMonitor) {
    let (tx, rx) = watch::channel(initially_up);
    (tx, LinkMonitor { rx })
}

impl NetworkMonitor for AlwaysOnline {
    fn is_available(&self) -> bool {
        true
    }
}

impl NetworkMonitor for LinkMonitor {
    fn is_available(&self) -> bool {
        *self.rx.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_monitor_follows_sender() {
        let (tx, monitor) = link_monitor(false);
        assert!(!monitor.is_available());

        tx.send_replace(true);
        assert!(monitor.is_available());
        assert!(AlwaysOnline.is_available());
    }

    #[test]
    fn test_link_monitor_keeps_last_value_after_sender_drop() {
        let (tx, monitor) = link_monitor(true);
        drop(tx);
        assert!(monitor.is_available());
    }
}
