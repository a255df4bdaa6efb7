mod common;

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use common::{MockConnector, Sent, Switch, Wire};
use psos::{
    delivery_queue, uplink, ConnectionConfig, ConnectionManager, ConnectionState, QoS, Registry,
    ResetHandler, ResetRequest, Route, Router, Supervisor,
};

struct Harness {
    router: Router,
    manager: ConnectionManager,
    wire: Wire,
    connector: Arc<MockConnector>,
}

fn config(connect_attempts: u32) -> ConnectionConfig {
    ConnectionConfig {
        connect_attempts,
        ..ConnectionConfig::default()
    }
}

fn harness(
    connector: MockConnector,
    network: Switch,
    config: ConnectionConfig,
) -> Harness {
    let wire = connector.wire.clone();
    let connector = Arc::new(connector);
    let (uplink, end) = uplink();
    let registry = Arc::new(Registry::new(uplink.clone()));
    let router = Router::new(registry.clone(), uplink);
    let manager = ConnectionManager::new(config, connector.clone(), Arc::new(network), registry, end);
    Harness {
        router,
        manager,
        wire,
        connector,
    }
}

fn online() -> Harness {
    harness(MockConnector::new(Wire::default()), Switch::new(true), config(3))
}

#[tokio::test]
async fn test_no_network_no_connect_attempts() {
    let network = Switch::new(false);
    let mut h = harness(MockConnector::new(Wire::default()), network.clone(), config(3));

    h.manager.poll_once().await.unwrap();
    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(h.router.state(), ConnectionState::Disconnected);

    network.set(true);
    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Connected);
}

/// Все подписки повторно отправляются после каждого переподключения,
/// ровно по одному разу и в порядке регистрации.
#[tokio::test]
async fn test_resubscribe_after_reconnect_in_registration_order() {
    let mut h = online();
    let (q1, _r1) = delivery_queue();
    let (q2, _r2) = delivery_queue();
    for (filter, queue) in [("cmd/#", &q1), ("sensor/+/temp", &q2), ("status", &q1)] {
        let handle = h.router.subscribe(filter, queue, QoS::AtMostOnce).unwrap();
        assert!(!handle.sent_upstream);
    }

    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Connected);
    assert_eq!(h.wire.subscribes(), ["cmd/#", "sensor/+/temp", "status"]);

    h.wire.break_link();
    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Disconnected);
    assert_eq!(h.wire.sent().last(), Some(&Sent::Disconnect));

    h.wire.clear();
    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Connected);
    assert_eq!(h.wire.subscribes(), ["cmd/#", "sensor/+/temp", "status"]);
    assert_eq!(h.connector.attempts(), 2);
}

#[tokio::test]
async fn test_subscribe_while_connected_goes_upstream_once() {
    let mut h = online();
    h.manager.poll_once().await.unwrap();

    let (q, _r) = delivery_queue();
    let handle = h.router.subscribe("display/#", &q, QoS::AtLeastOnce).unwrap();
    assert!(handle.sent_upstream);

    h.manager.poll_once().await.unwrap();
    assert_eq!(h.wire.subscribes(), ["display/#"]);
}

/// Топики с локальным префиксом никогда не уходят брокеру, независимо от
/// состояния соединения.
#[tokio::test]
async fn test_local_prefix_never_reaches_transport() {
    let mut h = online();
    let (q, mut r) = delivery_queue();
    h.router.subscribe("x/y", &q, QoS::AtMostOnce).unwrap();

    let offline = h.router.publish("local/x/y", "1", false, QoS::AtMostOnce).unwrap();
    assert_eq!(offline, Route::Local { delivered: 1 });

    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Connected);

    let online = h.router.publish("local/x/y", "2", false, QoS::AtMostOnce).unwrap();
    assert_eq!(online, Route::Local { delivered: 1 });
    h.manager.poll_once().await.unwrap();

    assert_eq!(h.wire.publishes(), 0);
    assert_eq!(r.try_recv().unwrap().payload_str(), "1");
    let second = r.try_recv().unwrap();
    assert_eq!(&*second.topic, "x/y");
    assert_eq!(second.payload_str(), "2");
}

#[tokio::test]
async fn test_offline_publish_delivers_locally() {
    let h = harness(MockConnector::new(Wire::default()), Switch::new(false), config(3));
    let (q, mut r) = delivery_queue();
    h.router.subscribe("sensor/#", &q, QoS::AtMostOnce).unwrap();

    let route = h.router.publish("sensor/1/temp", "20", false, QoS::AtMostOnce).unwrap();
    assert_eq!(route, Route::Local { delivered: 1 });
    assert_eq!(r.try_recv().unwrap().payload_str(), "20");
    assert!(h.wire.sent().is_empty());
}

#[tokio::test]
async fn test_connected_publish_goes_upstream_only() {
    let mut h = online();
    let (q, mut r) = delivery_queue();
    h.router.subscribe("sensor/#", &q, QoS::AtMostOnce).unwrap();
    h.manager.poll_once().await.unwrap();

    let route = h.router.publish("sensor/1/temp", "20", true, QoS::AtLeastOnce).unwrap();
    assert_eq!(route, Route::Upstream);
    h.manager.poll_once().await.unwrap();

    assert!(h.wire.sent().contains(&Sent::Publish {
        topic: "sensor/1/temp".into(),
        payload: Bytes::from_static(b"20"),
    }));
    assert!(r.is_empty());
}

/// Публикация, отправка которой не удалась, доставляется локально, а
/// соединение сбрасывается.
#[tokio::test]
async fn test_failed_upstream_publish_falls_back_to_local() {
    let mut h = online();
    let (q, mut r) = delivery_queue();
    h.router.subscribe("sensor/#", &q, QoS::AtMostOnce).unwrap();
    h.manager.poll_once().await.unwrap();

    assert_eq!(
        h.router.publish("sensor/2/temp", "19", false, QoS::AtMostOnce).unwrap(),
        Route::Upstream
    );
    h.wire.break_link();
    h.manager.poll_once().await.unwrap();

    assert_eq!(r.try_recv().unwrap().payload_str(), "19");
    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.local_fallbacks, 1);
    assert_eq!(snapshot.disconnects, 1);
    // соединение восстановлено в том же цикле
    assert_eq!(h.connector.attempts(), 2);
    assert_eq!(h.wire.publishes(), 0);
}

/// Пропажа сети при установленном соединении сразу переводит менеджер в
/// `Disconnected`; уже поставленная и последующие публикации доставляются
/// локально.
#[tokio::test]
async fn test_network_loss_while_connected_falls_back_to_local() {
    let network = Switch::new(true);
    let mut h = harness(MockConnector::new(Wire::default()), network.clone(), config(3));
    let (q, mut r) = delivery_queue();
    h.router.subscribe("sensor/#", &q, QoS::AtMostOnce).unwrap();
    h.manager.poll_once().await.unwrap();
    assert_eq!(h.router.state(), ConnectionState::Connected);

    assert_eq!(
        h.router.publish("sensor/1/hum", "40", false, QoS::AtMostOnce).unwrap(),
        Route::Upstream
    );
    network.set(false);
    h.manager.poll_once().await.unwrap();

    assert_eq!(h.router.state(), ConnectionState::Disconnected);
    assert_eq!(r.try_recv().unwrap().payload_str(), "40");

    let route = h.router.publish("sensor/1/temp", "21", false, QoS::AtMostOnce).unwrap();
    assert_eq!(route, Route::Local { delivered: 1 });
    assert_eq!(r.try_recv().unwrap().payload_str(), "21");

    for _ in 0..5 {
        h.manager.poll_once().await.unwrap();
    }
    assert_eq!(h.router.state(), ConnectionState::Disconnected);
    assert_eq!(h.wire.publishes(), 0);
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.manager.snapshot().disconnects, 1);
}

#[tokio::test]
async fn test_inbound_messages_dispatched_like_local() {
    let mut h = online();
    let (q, mut r) = delivery_queue();
    h.router.subscribe("cmd/+", &q, QoS::AtMostOnce).unwrap();
    h.manager.poll_once().await.unwrap();

    h.wire.push_inbound("cmd/menu", "next");
    h.wire.push_inbound("other/topic", "ignored");
    h.manager.poll_once().await.unwrap();

    let env = r.try_recv().unwrap();
    assert_eq!(&*env.filter, "cmd/+");
    assert_eq!(&*env.topic, "cmd/menu");
    assert_eq!(env.payload_str(), "next");
    assert!(r.is_empty());
}

#[tokio::test]
async fn test_ping_every_idle_threshold() {
    let config = ConnectionConfig {
        ping_idle_cycles: 3,
        ..ConnectionConfig::default()
    };
    let mut h = harness(MockConnector::new(Wire::default()), Switch::new(true), config);
    h.manager.poll_once().await.unwrap();

    for _ in 0..7 {
        h.manager.poll_once().await.unwrap();
    }
    let pings = h.wire.sent().iter().filter(|s| **s == Sent::Ping).count();
    assert_eq!(pings, 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_connect_within_bound() {
    let mut h = harness(
        MockConnector::failing(Wire::default(), 2),
        Switch::new(true),
        config(3),
    );
    let mut state = h.router.watch_state();

    let started = tokio::time::Instant::now();
    h.manager.poll_once().await.unwrap();

    assert_eq!(h.connector.attempts(), 3);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(600), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(700), "{elapsed:?}");
    assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);
}

#[derive(Default)]
struct RecordingReset {
    requests: parking_lot::Mutex<Vec<String>>,
}

impl ResetHandler for RecordingReset {
    fn reset(
        &self,
        reason: &str,
    ) -> ResetRequest {
        self.requests.lock().push(reason.to_string());
        ResetRequest {
            reason: reason.to_string(),
        }
    }
}

/// Исчерпанные попытки подключения дают ровно один запрос на перезапуск.
#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_request_single_reset() {
    let h = harness(
        MockConnector::unreachable(Wire::default()),
        Switch::new(true),
        config(3),
    );
    let reset = Arc::new(RecordingReset::default());
    let supervisor = Supervisor::new(reset.clone());
    let state = h.router.watch_state();

    let request = supervisor.run(h.manager).await.unwrap();

    assert_eq!(h.connector.attempts(), 3);
    assert!(request.reason.contains("after 3 attempts"), "{}", request.reason);
    assert_eq!(reset.requests.lock().len(), 1);
    assert_eq!(*state.borrow(), ConnectionState::Disconnected);
}

/// Публикации и подписки продолжают работать, пока менеджер в фоне
/// переживает обрыв связи.
#[tokio::test(start_paused = true)]
async fn test_background_manager_survives_link_loss() {
    let network = Switch::new(true);
    let h = harness(MockConnector::new(Wire::default()), network.clone(), config(3));
    let Harness {
        router,
        manager,
        wire,
        ..
    } = h;
    let (q, mut r) = delivery_queue();
    router.subscribe("sensor/#", &q, QoS::AtMostOnce).unwrap();

    let task = tokio::spawn(manager.run());
    let mut state = router.watch_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    network.set(false);
    wire.break_link();
    state.wait_for(|s| *s == ConnectionState::Disconnected).await.unwrap();

    router.publish("sensor/3/temp", "18", false, QoS::AtMostOnce).unwrap();
    assert_eq!(r.recv().await.unwrap().payload_str(), "18");

    network.set(true);
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    task.abort();
}
