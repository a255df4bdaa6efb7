pub mod config;
pub mod pubsub;

pub use config::ConfigError;
pub use pubsub::{RecvError, TryRecvError};
