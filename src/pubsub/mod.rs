//! Подсистема Publish–Subscribe.
//!
//! - `topic`: сопоставление топиков с MQTT-фильтрами (`+`, `#`) и их
//!   проверка.
//! - `queue`: очереди доставки подписчикам.
//! - `message`: конверт сообщения и уровни QoS.
//! - `registry`: список подписок и рассылка по очередям.
//! - `router`: публикация с учётом локального префикса и состояния
//!   соединения.
//! - `intern` (приватный): пул строк фильтров.

mod intern;
pub mod message;
pub mod queue;
pub mod registry;
pub mod router;
pub mod topic;

pub(crate) use intern::intern_filter;
pub use message::*;
pub use queue::*;
pub use registry::*;
pub use router::*;
pub use topic::{matches, validate_filter, validate_topic, TopicFilter};
