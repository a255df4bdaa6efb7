//! Заглушки транспорта для интеграционных тестов.
//!
//! `Wire` общий для коннектора и всех выданных им транспортов: тест видит,
//! что ушло «брокеру», и подкладывает входящие сообщения.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use psos::{
    network::{InboundMessage, NetworkMonitor},
    Connector, QoS, Transport, TransportConnectError, TransportIoError,
};

/// Операция, выполненная транспортом.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Publish { topic: String, payload: Bytes },
    Subscribe { filter: String },
    Ping,
    Disconnect,
}

#[derive(Clone, Default)]
pub struct Wire {
    sent: Arc<Mutex<Vec<Sent>>>,
    inbound: Arc<Mutex<VecDeque<InboundMessage>>>,
    broken: Arc<AtomicBool>,
}

impl Wire {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }

    pub fn publishes(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|s| matches!(s, Sent::Publish { .. }))
            .count()
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|s| match s {
                Sent::Subscribe { filter } => Some(filter.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn push_inbound(
        &self,
        topic: &str,
        payload: &'static str,
    ) {
        self.inbound.lock().push_back(InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload.as_bytes()),
            qos: QoS::AtMostOnce,
            retain: false,
        });
    }

    /// Следующая операция транспорта завершится ошибкой.
    pub fn break_link(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), TransportIoError> {
        if self.broken.swap(false, Ordering::SeqCst) {
            Err(TransportIoError::Closed)
        } else {
            Ok(())
        }
    }

    fn record(
        &self,
        op: Sent,
    ) {
        self.sent.lock().push(op);
    }
}

pub struct MockTransport {
    wire: Wire,
}

#[async_trait]
impl Transport for MockTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        _retain: bool,
        _qos: QoS,
    ) -> Result<(), TransportIoError> {
        self.wire.check()?;
        self.wire.record(Sent::Publish {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(
        &mut self,
        filter: &str,
        _qos: QoS,
    ) -> Result<(), TransportIoError> {
        self.wire.check()?;
        self.wire.record(Sent::Subscribe {
            filter: filter.to_string(),
        });
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportIoError> {
        self.wire.check()?;
        self.wire.record(Sent::Ping);
        Ok(())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, TransportIoError> {
        self.wire.check()?;
        Ok(self.wire.inbound.lock().pop_front())
    }

    async fn disconnect(&mut self) {
        self.wire.record(Sent::Disconnect);
    }
}

/// Коннектор, отказывающий первые `failures` попыток.
pub struct MockConnector {
    pub wire: Wire,
    failures: AtomicU32,
    pub attempts: AtomicU32,
}

impl MockConnector {
    pub fn new(wire: Wire) -> Self {
        Self::failing(wire, 0)
    }

    pub fn failing(
        wire: Wire,
        failures: u32,
    ) -> Self {
        Self {
            wire,
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn unreachable(wire: Wire) -> Self {
        Self::failing(wire, u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(TransportConnectError::Refused {
                address: self.endpoint(),
                reason: "connection refused".into(),
            });
        }
        Ok(Box::new(MockTransport {
            wire: self.wire.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        "mock://broker".to_string()
    }
}

/// Сеть, доступность которой переключает тест.
#[derive(Clone)]
pub struct Switch(pub Arc<AtomicBool>);

impl Switch {
    pub fn new(up: bool) -> Self {
        Self(Arc::new(AtomicBool::new(up)))
    }

    pub fn set(
        &self,
        up: bool,
    ) {
        self.0.store(up, Ordering::SeqCst);
    }
}

impl NetworkMonitor for Switch {
    fn is_available(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
