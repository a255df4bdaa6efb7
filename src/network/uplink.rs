//! Канал между маршрутизатором и менеджером соединения.
//!
//! Маршрутизатор и реестр не владеют транспортом: они читают состояние
//! соединения из `watch`-канала и отправляют запросы к брокеру в очередь
//! команд. Единственный потребитель очереди: `ConnectionManager`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::ConnectionState;
use crate::pubsub::QoS;

/// Запрос к брокеру, поставленный маршрутизатором или реестром.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamCommand {
    Publish {
        topic: Arc<str>,
        payload: Bytes,
        retain: bool,
        qos: QoS,
    },
    Subscribe {
        filter: Arc<str>,
        qos: QoS,
    },
}

/// Сторона производителя: копируется в `Registry` и `Router`.
#[derive(Debug, Clone)]
pub struct Uplink {
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::UnboundedSender<UpstreamCommand>,
}

/// Сторона менеджера соединения.
#[derive(Debug)]
pub struct UplinkEnd {
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) commands: mpsc::UnboundedReceiver<UpstreamCommand>,
}

/// Создаёт связанную пару `Uplink`/`UplinkEnd` в состоянии `Disconnected`.
pub fn uplink() -> (Uplink, UplinkEnd) {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    (
        Uplink {
            state: state_rx,
            commands: cmd_tx,
        },
        UplinkEnd {
            state: state_tx,
            commands: cmd_rx,
        },
    )
}

impl Uplink {
    /// `Uplink` без менеджера: всегда `Disconnected`, все команды отклоняются.
    ///
    /// Используется на устройствах без сети, где маршрутизатор работает
    /// только как локальная шина.
    pub fn detached() -> Self {
        let (uplink, end) = uplink();
        drop(end);
        uplink
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Новый подписчик на изменения состояния.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Ставит команду в очередь менеджера.
    ///
    /// Если менеджер остановлен, команда возвращается вызывающему, чтобы тот
    /// мог доставить публикацию локально.
    pub fn send(
        &self,
        cmd: UpstreamCommand,
    ) -> Result<(), UpstreamCommand> {
        self.commands.send(cmd).map_err(|e| e.0)
    }
}

impl UplinkEnd {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Меняет состояние и возвращает предыдущее.
    pub(crate) fn set_state(
        &self,
        next: ConnectionState,
    ) -> ConnectionState {
        self.state.send_replace(next)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}
