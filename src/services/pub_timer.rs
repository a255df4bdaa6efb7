use bytes::Bytes;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::Services;
use crate::{
    config::PubTimerSettings,
    pubsub::{QoS, Router},
};

/// Публикует фиксированные сообщения в заданные топики с постоянным
/// периодом.
///
/// Сообщение `i` уходит в топик `i`; топикам без пары достаётся пустая
/// нагрузка.
pub struct PubTimer {
    router: Router,
    settings: PubTimerSettings,
}

impl PubTimer {
    pub fn new(
        services: &Services,
        settings: PubTimerSettings,
    ) -> Self {
        Self {
            router: services.router.clone(),
            settings,
        }
    }

    pub async fn run(self) {
        let start = Instant::now() + self.settings.initial_wait();
        let mut ticker = interval_at(start, self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let published = self.publish_round().await;
            debug!(published, "pub_timer round complete");
        }
    }

    /// Одна рассылка по всем топикам. Возвращает число принятых публикаций.
    pub async fn publish_round(&self) -> usize {
        let mut published = 0;
        for (i, topic) in self.settings.topics.iter().enumerate() {
            let payload = self
                .settings
                .messages
                .get(i)
                .map(|m| Bytes::from(m.clone()))
                .unwrap_or_default();

            match self.router.publish(topic, payload, false, QoS::AtMostOnce) {
                Ok(_) => published += 1,
                Err(e) => warn!(topic = %topic, error = %e, "pub_timer publish rejected"),
            }
            sleep(self.settings.spacing()).await;
        }
        published
    }
}
