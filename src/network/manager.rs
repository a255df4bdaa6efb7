//! Менеджер соединения с брокером.
//!
//! Единственный владелец транспорта. Работает циклами с периодом
//! `poll_period`: при отсутствии соединения и доступной сети подключается,
//! при установленном соединении раз в `ping_idle_cycles` циклов отправляет
//! ping и забирает входящие сообщения в `Registry::dispatch`.
//!
//! Между циклами обрабатываются команды, поставленные маршрутизатором и
//! реестром через `Uplink`.

use std::{sync::Arc, time::Duration};

use psos_error::{ErrorExt, FatalConnectivityError, TransportConnectError, TransportIoError};
use serde::Serialize;
use tokio::{
    select,
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::{debug, error, info, trace, warn};

use super::{
    connection_state::ConnectionSnapshot, ConnectionState, ConnectionStats, Connector,
    NetworkMonitor, Transport, UplinkEnd, UpstreamCommand,
};
use crate::pubsub::Registry;

/// Сколько входящих сообщений забирается за один цикл.
const MAX_INBOUND_PER_CYCLE: usize = 64;

/// Параметры менеджера соединения. Неизменяемы после запуска.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Попыток подключения до `FatalConnectivityError`
    pub connect_attempts: u32,
    /// Пауза между попытками
    pub retry_delay: Duration,
    /// Ping отправляется раз в столько циклов
    pub ping_idle_cycles: u32,
    /// Период цикла
    pub poll_period: Duration,
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    monitor: Arc<dyn NetworkMonitor>,
    registry: Arc<Registry>,
    end: UplinkEnd,
    transport: Option<Box<dyn Transport>>,
    idle_cycles: u32,
    stats: Arc<ConnectionStats>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay: Duration::from_millis(300),
            ping_idle_cycles: 150,
            poll_period: Duration::from_millis(100),
        }
    }
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        monitor: Arc<dyn NetworkMonitor>,
        registry: Arc<Registry>,
        end: UplinkEnd,
    ) -> Self {
        Self {
            config,
            connector,
            monitor,
            registry,
            end,
            transport: None,
            idle_cycles: 0,
            stats: Arc::new(ConnectionStats::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.end.state()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Счётчики, разделяемые с внешними наблюдателями.
    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.stats.clone()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.stats.snapshot(self.state())
    }

    /// Основной цикл. Завершается `Ok`, когда сброшены все `Uplink`, и
    /// `Err`, когда исчерпаны попытки подключения.
    pub async fn run(mut self) -> Result<(), FatalConnectivityError> {
        info!(
            endpoint = %self.connector.endpoint(),
            poll_period_ms = self.config.poll_period.as_millis() as u64,
            "Connection manager started"
        );

        let mut ticker = interval(self.config.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        error!(error = %e, "Connection manager gave up");
                        return Err(e);
                    }
                }
                command = self.end.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("Router dropped, stopping connection manager");
                        self.shutdown().await;
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Один цикл: команды, затем подключение либо ping и приём.
    pub async fn poll_once(&mut self) -> Result<(), FatalConnectivityError> {
        self.check_network();
        self.drain_commands().await;

        if self.transport.is_none() {
            if self.monitor.is_available() {
                self.connect().await?;
            }
            return Ok(());
        }

        self.idle_cycles += 1;
        if self.idle_cycles >= self.config.ping_idle_cycles {
            self.idle_cycles = 0;
            self.ping().await;
        }
        self.receive().await;
        Ok(())
    }

    /// Корректно закрывает соединение.
    pub async fn shutdown(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect(&mut self) -> Result<(), FatalConnectivityError> {
        self.set_state(ConnectionState::Connecting);
        let attempts = self.config.connect_attempts;
        let mut last_error: Option<TransportConnectError> = None;

        for attempt in 1..=attempts {
            if !self.monitor.is_available() {
                debug!("Network lost while connecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            match self.connector.connect().await {
                Ok(transport) => {
                    ConnectionStats::bump(&self.stats.connects);
                    self.on_connected(transport).await;
                    return Ok(());
                }
                Err(e) => {
                    ConnectionStats::bump(&self.stats.connect_failures);
                    warn!(attempt, attempts, endpoint = %self.connector.endpoint(), status = %e.status_code(), error = %e, "Connect attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        Err(FatalConnectivityError {
            attempts,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no connection attempts configured".to_string()),
        })
    }

    /// `Connected` выставляется до повторной подписки: фильтр, добавленный
    /// в этот промежуток, уйдёт брокеру не позже чем через команду
    /// `Subscribe`, в худшем случае дважды.
    async fn on_connected(
        &mut self,
        mut transport: Box<dyn Transport>,
    ) {
        self.set_state(ConnectionState::Connected);
        match self.registry.resubscribe_all(transport.as_mut()).await {
            Ok(count) => {
                info!(endpoint = %self.connector.endpoint(), resubscribed = count, "Connected to broker");
                self.transport = Some(transport);
                self.idle_cycles = 0;
            }
            Err(e) => {
                warn!(error = %e, "Resubscribe failed, dropping connection");
                transport.disconnect().await;
                ConnectionStats::bump(&self.stats.disconnects);
                self.set_state(ConnectionState::Disconnected);
            }
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.end.commands.try_recv() {
            self.handle_command(command).await;
        }
    }

    async fn handle_command(
        &mut self,
        command: UpstreamCommand,
    ) {
        self.check_network();
        match command {
            UpstreamCommand::Publish {
                topic,
                payload,
                retain,
                qos,
            } => {
                let result = match self.transport.as_mut() {
                    Some(transport) => Some(transport.publish(&topic, payload.clone(), retain, qos).await),
                    None => None,
                };
                match result {
                    Some(Ok(())) => ConnectionStats::bump(&self.stats.published),
                    Some(Err(e)) => {
                        self.drop_connection("publish", e).await;
                        self.deliver_locally(&topic, payload);
                    }
                    None => self.deliver_locally(&topic, payload),
                }
            }
            UpstreamCommand::Subscribe { filter, qos } => {
                let result = match self.transport.as_mut() {
                    Some(transport) => Some(transport.subscribe(&filter, qos).await),
                    None => None,
                };
                match result {
                    Some(Ok(())) => debug!(filter = %filter, "Subscribed upstream"),
                    Some(Err(e)) => self.drop_connection("subscribe", e).await,
                    // реестр отправит фильтр при следующем подключении
                    None => trace!(filter = %filter, "Subscribe deferred until reconnect"),
                }
            }
        }
    }

    fn deliver_locally(
        &self,
        topic: &str,
        payload: bytes::Bytes,
    ) {
        ConnectionStats::bump(&self.stats.local_fallbacks);
        let delivered = self.registry.dispatch(topic, payload);
        debug!(topic, delivered, "Broker unavailable, delivered locally");
    }

    async fn ping(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        ConnectionStats::bump(&self.stats.pings);
        match transport.ping().await {
            Ok(()) => trace!("Ping ok"),
            Err(e) => self.drop_connection("ping", e).await,
        }
    }

    async fn receive(&mut self) {
        for _ in 0..MAX_INBOUND_PER_CYCLE {
            let next = match self.transport.as_mut() {
                Some(transport) => transport.poll_inbound().await,
                None => return,
            };
            match next {
                Ok(Some(message)) => {
                    ConnectionStats::bump(&self.stats.inbound);
                    trace!(topic = %message.topic, retain = message.retain, "Inbound message");
                    self.registry.dispatch(&message.topic, message.payload);
                }
                Ok(None) => return,
                Err(e) => {
                    self.drop_connection("receive", e).await;
                    return;
                }
            }
        }
    }

    /// Пропажа сети при живом транспорте сразу переводит в `Disconnected`,
    /// не дожидаясь ошибки ping. DISCONNECT не отправляется: канала уже нет.
    fn check_network(&mut self) {
        if self.transport.is_none() || self.monitor.is_available() {
            return;
        }
        warn!(endpoint = %self.connector.endpoint(), "Network lost, dropping connection");
        self.transport = None;
        ConnectionStats::bump(&self.stats.disconnects);
        self.set_state(ConnectionState::Disconnected);
    }

    async fn drop_connection(
        &mut self,
        operation: &'static str,
        error: TransportIoError,
    ) {
        warn!(operation, status = %error.status_code(), error = %error, "Connection lost");
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await;
        }
        ConnectionStats::bump(&self.stats.disconnects);
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(
        &mut self,
        next: ConnectionState,
    ) {
        let prev = self.end.set_state(next);
        if prev != next {
            info!(from = %prev, to = %next, "Connection state changed");
        }
    }
}
