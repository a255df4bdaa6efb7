//! MQTT 3.1.1 поверх TCP/TLS.
//!
//! - `packet`: пакеты и инкрементальный кодек.
//! - `client`: `MqttConnector` и `MqttTransport`, реализующие трейты
//!   `Connector`/`Transport`.
//! - `tls`: клиентская TLS-конфигурация с закреплённым корневым сертификатом.

pub mod client;
pub mod packet;
pub mod tls;

pub use client::{MqttConnector, MqttOptions, MqttTransport};
pub use packet::{MqttCodec, Packet};
