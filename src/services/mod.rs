//! Встроенные сервисы и контейнер зависимостей, через который они получают
//! маршрутизатор и обработчик перезапуска.

mod pub_timer;
mod reset;

use std::sync::Arc;

pub use pub_timer::PubTimer;
pub use reset::ResetListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::{config::Settings, pubsub::Router, supervisor::ResetHandler};

/// Зависимости сервисов. Собирается один раз при старте.
#[derive(Clone)]
pub struct Services {
    pub router: Router,
    pub reset: Arc<dyn ResetHandler>,
    pub settings: Arc<Settings>,
}

impl Services {
    pub fn new(
        router: Router,
        reset: Arc<dyn ResetHandler>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            router,
            reset,
            settings,
        }
    }

    /// Запускает сервисы, включённые в секции `[services]`.
    pub fn spawn_configured(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        if let Some(timer) = &self.settings.services.pub_timer {
            info!(topics = timer.topics.len(), interval_ms = timer.interval_ms, "Starting pub_timer");
            let service = PubTimer::new(self, timer.clone());
            tasks.push(tokio::spawn(service.run()));
        }

        if let Some(reset) = &self.settings.services.reset {
            info!(topic = %reset.topic, "Starting reset listener");
            let service = ResetListener::new(self, reset.topic.clone());
            tasks.push(tokio::spawn(async move {
                if let Err(e) = service.run().await {
                    tracing::warn!(error = %e, "Reset listener stopped");
                }
            }));
        }

        tasks
    }
}
