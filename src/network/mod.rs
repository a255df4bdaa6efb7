//! Сетевой модуль PSOS.
//!
//! ## Подмодули
//!
//! - `connection_state`: состояние соединения с брокером и его счётчики.
//! - `uplink`: канал состояния и команд между маршрутизатором и менеджером.
//! - `transport`: трейты `Transport`, `Connector`, `NetworkMonitor`.
//! - `manager`: менеджер соединения (подключение, повторы, ping, приём).
//! - `mqtt`: клиент MQTT 3.1.1 поверх TCP/TLS.
//! - `proxy`: LAN-прокси для устройств без TLS.
//! - `banner`: баннер при старте.

pub mod banner;
pub mod connection_state;
pub mod manager;
pub mod mqtt;
pub mod proxy;
pub mod transport;
pub mod uplink;

pub use connection_state::{ConnectionSnapshot, ConnectionState, ConnectionStats};
pub use manager::{ConnectionConfig, ConnectionManager};
pub use transport::{
    link_monitor, AlwaysOnline, Connector, InboundMessage, LinkMonitor, NetworkMonitor, Transport,
};
pub use uplink::{uplink, Uplink, UplinkEnd, UpstreamCommand};
