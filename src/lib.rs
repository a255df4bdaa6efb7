/// Process settings: defaults, `psos.toml`, `PSOS_*` environment.
pub mod config;
/// Queue and configuration errors (transport and routing errors live in `psos-error`).
pub mod error;
/// Logging (console/file sinks, filters, formatting).
pub mod logging;
/// Broker connectivity: connection manager, MQTT transport, LAN proxy.
pub mod network;
/// Pub/Sub: topic matching, delivery queues, registry, router.
pub mod pubsub;
/// Built-in services: periodic publisher, reset listener.
pub mod services;
/// Reset-on-fatal handling.
pub mod supervisor;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::Settings;
/// Operation errors.
pub use error::{ConfigError, RecvError, TryRecvError};
/// Connection management.
pub use network::{
    uplink, ConnectionConfig, ConnectionManager, ConnectionState, Connector, NetworkMonitor,
    Transport,
};
/// Routing errors from the shared error crate.
pub use psos_error::{
    FatalConnectivityError, InvalidFilterError, InvalidQosError, InvalidTopicError,
    TransportConnectError, TransportIoError,
};
/// Pub/Sub API.
pub use pubsub::{
    delivery_queue, matches, DeliveryQueue, Envelope, QoS, QueueHandle, Registry, Route, Router,
    SubscriptionHandle,
};
/// Services and supervision.
pub use services::Services;
pub use supervisor::{ProcessReset, ResetHandler, ResetRequest, Supervisor, RESET_EXIT_CODE};
