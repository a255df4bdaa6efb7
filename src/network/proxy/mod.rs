//! LAN-прокси: доступ к брокеру для устройств без TLS.
//!
//! `ProxyServer` работает на устройстве с полноценным MQTT-соединением и
//! обслуживает клиентов через свой `Router`. `ProxyConnector` на другом
//! устройстве реализует `Connector`, так что менеджер соединения не
//! отличает прокси от брокера.

pub mod client;
pub mod protocol;
pub mod server;

pub use client::{ProxyConnector, ProxyTransport};
pub use protocol::{Request, Response};
pub use server::{ProxyServer, ProxyServerConfig, ProxyShutdown};
