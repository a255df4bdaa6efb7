use std::sync::Arc;

use bytes::Bytes;
use psos_error::{InvalidFilterError, InvalidTopicError};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::{topic::validate_topic, QoS, QueueHandle, Registry, SubscriptionHandle};
use crate::network::{ConnectionState, Uplink, UpstreamCommand};

/// Префикс топиков, которые никогда не покидают устройство.
pub const DEFAULT_LOCAL_PREFIX: &str = "local/";

/// Куда ушла публикация.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Доставлено локальным подписчикам (`delivered` штук).
    Local { delivered: usize },
    /// Передано менеджеру соединения для отправки брокеру.
    Upstream,
}

/// Точка входа для сервисов: публикация, подписка, отписка.
///
/// Дёшево клонируется; все копии разделяют один реестр.
#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
    uplink: Uplink,
    local_prefix: Arc<str>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        uplink: Uplink,
    ) -> Self {
        Self {
            registry,
            uplink,
            local_prefix: Arc::from(DEFAULT_LOCAL_PREFIX),
        }
    }

    /// Маршрутизатор без брокера: всё доставляется локально.
    pub fn offline() -> Self {
        let uplink = Uplink::detached();
        Self::new(Arc::new(Registry::new(uplink.clone())), uplink)
    }

    pub fn with_local_prefix(
        mut self,
        prefix: impl Into<Arc<str>>,
    ) -> Self {
        self.local_prefix = prefix.into();
        self
    }

    /// Публикует сообщение.
    ///
    /// - топик с локальным префиксом: префикс снимается, сообщение
    ///   доставляется только локально;
    /// - соединение установлено: сообщение уходит брокеру, локальной доставки
    ///   нет (подписчики получат его обратно от брокера);
    /// - иначе: локальная доставка.
    ///
    /// Возвращается после передачи, не дожидаясь подтверждения брокера.
    pub fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        retain: bool,
        qos: QoS,
    ) -> Result<Route, InvalidTopicError> {
        let payload = payload.into();

        if let Some(local) = topic.strip_prefix(&*self.local_prefix) {
            validate_topic(local)?;
            trace!(topic = local, "Local publish");
            let delivered = self.registry.dispatch(local, payload);
            return Ok(Route::Local { delivered });
        }

        validate_topic(topic)?;

        if self.uplink.is_connected() {
            let cmd = UpstreamCommand::Publish {
                topic: Arc::from(topic),
                payload: payload.clone(),
                retain,
                qos,
            };
            if self.uplink.send(cmd).is_ok() {
                return Ok(Route::Upstream);
            }
            debug!(topic, "Connection manager stopped, delivering locally");
        }

        let delivered = self.registry.dispatch(topic, payload);
        Ok(Route::Local { delivered })
    }

    pub fn subscribe(
        &self,
        filter: &str,
        queue: &QueueHandle,
        qos: QoS,
    ) -> Result<SubscriptionHandle, InvalidFilterError> {
        self.registry.subscribe(filter, queue, qos)
    }

    pub fn unsubscribe(
        &self,
        queue: &QueueHandle,
    ) -> usize {
        self.registry.unsubscribe(queue)
    }

    /// Текущее состояние соединения.
    pub fn state(&self) -> ConnectionState {
        self.uplink.state()
    }

    /// Поток изменений состояния (индикатор связи для дисплея и т.п.).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.uplink.watch()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn local_prefix(&self) -> &str {
        &self.local_prefix
    }
}
