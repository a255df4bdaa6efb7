use std::sync::Arc;

use psos_error::InvalidFilterError;
use tracing::info;

use super::Services;
use crate::{
    pubsub::{delivery_queue, QoS, Router},
    supervisor::ResetHandler,
};

/// Перезапускает устройство по любому сообщению в топик `topic`.
/// Нагрузка сообщения становится причиной перезапуска.
pub struct ResetListener {
    router: Router,
    reset: Arc<dyn ResetHandler>,
    topic: String,
}

impl ResetListener {
    pub fn new(
        services: &Services,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            router: services.router.clone(),
            reset: services.reset.clone(),
            topic: topic.into(),
        }
    }

    /// Работает, пока очередь не закрыта.
    pub async fn run(self) -> Result<(), InvalidFilterError> {
        let (handle, mut queue) = delivery_queue();
        self.router.subscribe(&self.topic, &handle, QoS::AtMostOnce)?;

        while let Ok(envelope) = queue.recv().await {
            let reason = envelope.payload_str();
            info!(topic = %envelope.topic, reason = %reason, "Reset command received");
            self.reset.reset(&reason);
        }

        self.router.unsubscribe(&handle);
        Ok(())
    }
}
