use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;
use psos_error::{InvalidFilterError, TransportIoError};
use serde::Serialize;
use tracing::{debug, trace};

use super::{Envelope, QoS, QueueHandle, QueueId, TopicFilter};
use crate::network::{Transport, Uplink, UpstreamCommand};

/// Активная подписка.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub filter: TopicFilter,
    pub queue: QueueHandle,
    pub qos: QoS,
}

/// Диагностический результат `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub filter: TopicFilter,
    pub queue: QueueId,
    pub qos: QoS,
    /// Было ли требование подписки передано брокеру немедленно.
    pub sent_upstream: bool,
}

/// Снимок счётчиков реестра.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub subscriptions: usize,
    pub dispatch_count: u64,
    pub delivered_count: u64,
    pub dropped_count: u64,
}

/// Реестр подписок.
///
/// Список подписок хранится в порядке регистрации под `parking_lot::Mutex`.
/// Блокировка никогда не удерживается через `.await`.
pub struct Registry {
    subscriptions: Mutex<Vec<Subscription>>,
    uplink: Uplink,
    /// Общее количество вызовов `dispatch`
    pub dispatch_count: AtomicU64,
    /// Сообщения, поставленные в очереди подписчиков
    pub delivered_count: AtomicU64,
    /// Сообщения, отброшенные из-за закрытой очереди
    pub dropped_count: AtomicU64,
}

impl Registry {
    pub fn new(uplink: Uplink) -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            uplink,
            dispatch_count: AtomicU64::new(0),
            delivered_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Реестр без брокера: подписки никогда не уходят наружу.
    pub fn offline() -> Self {
        Self::new(Uplink::detached())
    }

    /// Регистрирует подписку.
    ///
    /// Некорректный фильтр отклоняется, реестр при этом не меняется. Если
    /// соединение установлено, фильтр сразу отправляется брокеру; иначе он
    /// уйдёт при следующем `resubscribe_all`.
    pub fn subscribe(
        &self,
        filter: &str,
        queue: &QueueHandle,
        qos: QoS,
    ) -> Result<SubscriptionHandle, InvalidFilterError> {
        let filter = TopicFilter::parse(filter)?;

        self.subscriptions.lock().push(Subscription {
            filter: filter.clone(),
            queue: queue.clone(),
            qos,
        });
        debug!(filter = %filter, queue = %queue.id(), qos = qos.as_u8(), "Subscribed");

        let sent_upstream = self.uplink.is_connected()
            && self
                .uplink
                .send(UpstreamCommand::Subscribe {
                    filter: filter.as_shared().clone(),
                    qos,
                })
                .is_ok();

        Ok(SubscriptionHandle {
            filter,
            queue: queue.id(),
            qos,
            sent_upstream,
        })
    }

    /// Удаляет все подписки, ссылающиеся на `queue`. Возвращает их число.
    pub fn unsubscribe(
        &self,
        queue: &QueueHandle,
    ) -> usize {
        let removed = {
            let mut subs = self.subscriptions.lock();
            let before = subs.len();
            subs.retain(|s| s.queue != *queue);
            before - subs.len()
        };
        if removed > 0 {
            debug!(queue = %queue.id(), removed, "Unsubscribed");
        }
        removed
    }

    /// Кладёт сообщение в очередь каждой совпавшей подписки.
    ///
    /// Никогда не блокируется и не завершается ошибкой: отправка в закрытую
    /// очередь учитывается в `dropped_count`. Возвращает число доставок.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: Bytes,
    ) -> usize {
        self.dispatch_count.fetch_add(1, Ordering::Relaxed);

        let mut shared_topic: Option<Arc<str>> = None;
        let mut delivered = 0usize;
        let mut dropped = 0u64;

        {
            let subs = self.subscriptions.lock();
            for sub in subs.iter().filter(|s| s.filter.matches(topic)) {
                let shared = shared_topic
                    .get_or_insert_with(|| Arc::from(topic))
                    .clone();
                let envelope = Envelope::new(sub.filter.as_shared().clone(), shared, payload.clone());
                if sub.queue.push(envelope) {
                    delivered += 1;
                } else {
                    dropped += 1;
                    debug!(
                        filter = %sub.filter,
                        queue = %sub.queue.id(),
                        topic,
                        "Delivery queue closed, message dropped"
                    );
                }
            }
        }

        self.delivered_count
            .fetch_add(delivered as u64, Ordering::Relaxed);
        if dropped > 0 {
            self.dropped_count.fetch_add(dropped, Ordering::Relaxed);
        }
        trace!(topic, delivered, "Dispatched");
        delivered
    }

    /// Повторно отправляет брокеру все фильтры в порядке регистрации.
    ///
    /// Список копируется под блокировкой, сама отправка идёт без неё.
    pub async fn resubscribe_all(
        &self,
        transport: &mut dyn Transport,
    ) -> Result<usize, TransportIoError> {
        let snapshot: Vec<(TopicFilter, QoS)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|s| (s.filter.clone(), s.qos))
            .collect();

        for (filter, qos) in &snapshot {
            debug!(filter = %filter, "Resubscribing");
            transport.subscribe(filter.as_str(), *qos).await?;
        }
        Ok(snapshot.len())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.lock().is_empty()
    }

    /// Копия текущего списка подписок.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            subscriptions: self.len(),
            dispatch_count: self.dispatch_count.load(Ordering::Relaxed),
            delivered_count: self.delivered_count.load(Ordering::Relaxed),
            dropped_count: self.dropped_count.load(Ordering::Relaxed),
        }
    }
}
