use std::{
    collections::{HashSet, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use psos_error::{TransportConnectError, TransportIoError};
use rustls::pki_types::ServerName;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{lookup_host, TcpStream},
    time::timeout,
};
use tokio_rustls::TlsConnector;
use tracing::{debug, trace, warn};

use super::packet::{
    ConnAck, Connect, MqttCodec, Packet, Publish, Subscribe, DEFAULT_MAX_PACKET_SIZE,
    SUBACK_FAILURE,
};
use crate::{
    network::{Connector, InboundMessage, Transport},
    pubsub::QoS,
};

/// Поток байтов под MQTT: TCP или TLS поверх TCP.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

/// Параметры подключения к брокеру.
#[derive(Debug, Clone)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// Таймаут каждой сетевой операции: connect, TLS, чтение, запись.
    pub io_timeout: Duration,
    pub max_packet_size: usize,
}

/// Устанавливает соединения с MQTT-брокером.
pub struct MqttConnector {
    options: MqttOptions,
    tls: Option<TlsConnector>,
}

/// Установленная MQTT-сессия.
///
/// Входящие PUBLISH, пришедшие во время ожидания SUBACK или PINGRESP,
/// складываются в `pending` и отдаются через `poll_inbound`.
pub struct MqttTransport {
    io: Box<dyn Io>,
    codec: MqttCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pending: VecDeque<InboundMessage>,
    /// Входящие QoS 2, уже доставленные, но ещё без PUBREL
    awaiting_release: HashSet<u16>,
    next_packet_id: u16,
    io_timeout: Duration,
}

impl MqttOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            io_timeout: Duration::from_secs(5),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    fn connect_packet(&self) -> Connect {
        Connect {
            client_id: self.client_id.clone(),
            keep_alive: u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX),
            clean_session: true,
            username: self.username.clone(),
            password: self.password.clone().map(Bytes::from),
        }
    }
}

impl MqttConnector {
    pub fn new(options: MqttOptions) -> Self {
        Self { options, tls: None }
    }

    /// Включает TLS. Имя для проверки сертификата берётся из `host`.
    pub fn with_tls(
        mut self,
        tls: TlsConnector,
    ) -> Self {
        self.tls = Some(tls);
        self
    }

    async fn open_tcp(&self) -> Result<TcpStream, TransportConnectError> {
        let MqttOptions {
            host,
            port,
            io_timeout,
            ..
        } = &self.options;
        let address = format!("{host}:{port}");

        let mut addrs = timeout(*io_timeout, lookup_host((host.as_str(), *port)))
            .await
            .map_err(|_| TransportConnectError::Timeout {
                address: address.clone(),
            })?
            .map_err(|e| TransportConnectError::Resolve {
                host: host.clone(),
                reason: e.to_string(),
            })?;
        let addr = addrs.next().ok_or_else(|| TransportConnectError::Resolve {
            host: host.clone(),
            reason: "no addresses found".to_string(),
        })?;

        let stream = timeout(*io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportConnectError::Timeout {
                address: address.clone(),
            })?
            .map_err(|e| TransportConnectError::Refused {
                address,
                reason: e.to_string(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }
}

#[async_trait]
impl Connector for MqttConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportConnectError> {
        let tcp = self.open_tcp().await?;

        let io: Box<dyn Io> = match &self.tls {
            Some(tls) => {
                let server_name = ServerName::try_from(self.options.host.clone()).map_err(|e| {
                    TransportConnectError::Tls {
                        reason: format!("invalid server name: {e}"),
                    }
                })?;
                let stream = timeout(self.options.io_timeout, tls.connect(server_name, tcp))
                    .await
                    .map_err(|_| TransportConnectError::Timeout {
                        address: self.endpoint(),
                    })?
                    .map_err(|e| TransportConnectError::Tls {
                        reason: e.to_string(),
                    })?;
                Box::new(stream)
            }
            None => Box::new(tcp),
        };

        let mut transport = MqttTransport::new(io, self.options.io_timeout, self.options.max_packet_size);
        transport
            .handshake(self.options.connect_packet(), &self.endpoint())
            .await?;
        debug!(endpoint = %self.endpoint(), client_id = %self.options.client_id, "MQTT session established");
        Ok(Box::new(transport))
    }

    fn endpoint(&self) -> String {
        let scheme = if self.tls.is_some() { "mqtts" } else { "mqtt" };
        format!("{scheme}://{}:{}", self.options.host, self.options.port)
    }
}

impl MqttTransport {
    pub fn new(
        io: Box<dyn Io>,
        io_timeout: Duration,
        max_packet_size: usize,
    ) -> Self {
        Self {
            io,
            codec: MqttCodec::with_max_packet_size(max_packet_size),
            read_buf: BytesMut::with_capacity(4096),
            write_buf: BytesMut::with_capacity(1024),
            pending: VecDeque::new(),
            awaiting_release: HashSet::new(),
            next_packet_id: 0,
            io_timeout,
        }
    }

    /// Отправляет CONNECT и ждёт CONNACK.
    pub async fn handshake(
        &mut self,
        connect: Connect,
        endpoint: &str,
    ) -> Result<(), TransportConnectError> {
        let to_connect_error = |e: TransportIoError| match e {
            TransportIoError::Timeout { .. } => TransportConnectError::Timeout {
                address: endpoint.to_string(),
            },
            other => TransportConnectError::Protocol {
                reason: other.to_string(),
            },
        };

        self.send(&Packet::Connect(connect))
            .await
            .map_err(to_connect_error)?;
        match self.read_packet().await.map_err(to_connect_error)? {
            Packet::ConnAck(ConnAck {
                return_code: ConnAck::ACCEPTED,
                ..
            }) => Ok(()),
            Packet::ConnAck(ConnAck { return_code, .. }) => Err(TransportConnectError::Rejected {
                code: return_code,
                reason: ConnAck::reason(return_code).to_string(),
            }),
            other => Err(TransportConnectError::Protocol {
                reason: format!("expected CONNACK, got {:?}", other.packet_type()),
            }),
        }
    }

    fn next_id(&mut self) -> u16 {
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        self.next_packet_id
    }

    async fn send(
        &mut self,
        packet: &Packet,
    ) -> Result<(), TransportIoError> {
        self.write_buf.clear();
        packet
            .encode(&mut self.write_buf)
            .map_err(|e| TransportIoError::Protocol {
                reason: e.to_string(),
            })?;

        timeout(self.io_timeout, async {
            self.io.write_all(&self.write_buf).await?;
            self.io.flush().await
        })
        .await
        .map_err(|_| TransportIoError::Timeout { operation: "write" })?
        .map_err(|e| TransportIoError::from_io("write", &e))
    }

    /// Читает один пакет, ожидая данные не дольше `io_timeout` на чтение.
    async fn read_packet(&mut self) -> Result<Packet, TransportIoError> {
        loop {
            if let Some(packet) = self.decode_buffered()? {
                return Ok(packet);
            }
            let n = timeout(self.io_timeout, self.io.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| TransportIoError::Timeout { operation: "read" })?
                .map_err(|e| TransportIoError::from_io("read", &e))?;
            if n == 0 {
                return Err(TransportIoError::Closed);
            }
        }
    }

    fn decode_buffered(&mut self) -> Result<Option<Packet>, TransportIoError> {
        self.codec
            .decode(&mut self.read_buf)
            .map_err(|e| TransportIoError::Protocol {
                reason: e.to_string(),
            })
    }

    /// Ждёт пакет, для которого `want` вернёт `true`; остальные пакеты
    /// обрабатываются как обычно.
    async fn await_packet<F>(
        &mut self,
        operation: &'static str,
        mut want: F,
    ) -> Result<Packet, TransportIoError>
    where
        F: FnMut(&Packet) -> bool + Send,
    {
        let limit = self.io_timeout;
        timeout(limit, async {
            loop {
                let packet = self.read_packet().await?;
                if want(&packet) {
                    return Ok(packet);
                }
                self.handle_unsolicited(packet).await?;
            }
        })
        .await
        .map_err(|_| TransportIoError::Timeout { operation })?
    }

    /// Пакеты, пришедшие не в ответ на наш запрос.
    async fn handle_unsolicited(
        &mut self,
        packet: Packet,
    ) -> Result<(), TransportIoError> {
        match packet {
            Packet::Publish(publish) => self.accept_publish(publish).await,
            Packet::PubRel { packet_id } => {
                self.awaiting_release.remove(&packet_id);
                self.send(&Packet::PubComp { packet_id }).await
            }
            Packet::PubRec { packet_id } => self.send(&Packet::PubRel { packet_id }).await,
            Packet::PubAck { packet_id } | Packet::PubComp { packet_id } => {
                trace!(packet_id, "Outbound publish acknowledged");
                Ok(())
            }
            Packet::PingResp | Packet::SubAck(_) => {
                trace!(packet = ?packet.packet_type(), "Late response ignored");
                Ok(())
            }
            other => Err(TransportIoError::Protocol {
                reason: format!("unexpected {:?} from broker", other.packet_type()),
            }),
        }
    }

    async fn accept_publish(
        &mut self,
        publish: Publish,
    ) -> Result<(), TransportIoError> {
        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(packet_id)) => self.send(&Packet::PubAck { packet_id }).await?,
            (QoS::ExactlyOnce, Some(packet_id)) => {
                self.send(&Packet::PubRec { packet_id }).await?;
                // повтор до PUBREL: подтверждаем снова, но не доставляем
                if !self.awaiting_release.insert(packet_id) {
                    trace!(packet_id, topic = %publish.topic, "Duplicate QoS 2 publish dropped");
                    return Ok(());
                }
            }
            _ => {}
        }
        self.pending.push_back(InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: publish.qos,
            retain: publish.retain,
        });
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportIoError> {
        let packet_id = (qos != QoS::AtMostOnce).then(|| self.next_id());
        self.send(&Packet::Publish(Publish {
            topic: topic.to_string(),
            packet_id,
            payload,
            qos,
            dup: false,
            retain,
        }))
        .await
    }

    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> Result<(), TransportIoError> {
        let packet_id = self.next_id();
        self.send(&Packet::Subscribe(Subscribe {
            packet_id,
            filters: vec![(filter.to_string(), qos)],
        }))
        .await?;

        let ack = self
            .await_packet("subscribe", |p| {
                matches!(p, Packet::SubAck(ack) if ack.packet_id == packet_id)
            })
            .await?;
        if let Packet::SubAck(ack) = ack {
            if ack.return_codes.first() == Some(&SUBACK_FAILURE) {
                warn!(filter, "Broker refused subscription");
            }
        }
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), TransportIoError> {
        self.send(&Packet::PingReq).await?;
        self.await_packet("ping", |p| matches!(p, Packet::PingResp))
            .await
            .map(|_| ())
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, TransportIoError> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Ok(Some(message));
            }
            if let Some(packet) = self.decode_buffered()? {
                self.handle_unsolicited(packet).await?;
                continue;
            }
            // Нулевой таймаут: одна попытка чтения без ожидания.
            match timeout(Duration::ZERO, self.io.read_buf(&mut self.read_buf)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(TransportIoError::Closed),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(TransportIoError::from_io("read", &e)),
            }
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.send(&Packet::Disconnect).await {
            debug!(error = %e, "DISCONNECT not sent");
        }
        let _ = self.io.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::DuplexStream,
        net::{TcpListener, TcpStream},
    };

    use super::*;
    use crate::network::mqtt::packet::SubAck;

    /// Минимальный брокер поверх произвольного потока.
    struct FakeBroker<S> {
        stream: S,
        buf: BytesMut,
        codec: MqttCodec,
    }

    impl<S: AsyncRead + AsyncWrite + Unpin> FakeBroker<S> {
        fn new(stream: S) -> Self {
            Self {
                stream,
                buf: BytesMut::new(),
                codec: MqttCodec::new(),
            }
        }

        async fn read(&mut self) -> Packet {
            loop {
                if let Some(p) = self.codec.decode(&mut self.buf).unwrap() {
                    return p;
                }
                let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                assert!(n > 0, "client closed the stream");
            }
        }

        async fn write(
            &mut self,
            packet: Packet,
        ) {
            let mut out = BytesMut::new();
            packet.encode(&mut out).unwrap();
            self.stream.write_all(&out).await.unwrap();
        }
    }

    fn transport_pair() -> (MqttTransport, FakeBroker<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        (
            MqttTransport::new(Box::new(client), Duration::from_secs(1), DEFAULT_MAX_PACKET_SIZE),
            FakeBroker::new(server),
        )
    }

    fn publish(
        topic: &str,
        qos: QoS,
        packet_id: Option<u16>,
    ) -> Packet {
        Packet::Publish(Publish {
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::from_static(b"on"),
            qos,
            dup: false,
            retain: false,
        })
    }

    async fn accept_connack(
        listener: TcpListener,
        code: u8,
    ) -> FakeBroker<TcpStream> {
        let (stream, _) = listener.accept().await.unwrap();
        let mut broker = FakeBroker::new(stream);
        match broker.read().await {
            Packet::Connect(c) => assert_eq!(c.client_id, "dev1"),
            other => panic!("expected CONNECT, got {other:?}"),
        }
        broker
            .write(Packet::ConnAck(ConnAck {
                session_present: false,
                return_code: code,
            }))
            .await;
        broker
    }

    #[tokio::test]
    async fn test_connect_and_publish_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(async move {
            let mut broker = accept_connack(listener, 0).await;
            broker.read().await
        });

        let connector = MqttConnector::new(MqttOptions::new("127.0.0.1", port, "dev1"));
        assert_eq!(connector.endpoint(), format!("mqtt://127.0.0.1:{port}"));

        let mut transport = connector.connect().await.unwrap();
        transport
            .publish("sensor/1/temp", Bytes::from_static(b"21"), true, QoS::AtMostOnce)
            .await
            .unwrap();

        match broker.await.unwrap() {
            Packet::Publish(p) => {
                assert_eq!(p.topic, "sensor/1/temp");
                assert!(p.retain);
                assert_eq!(p.packet_id, None);
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rejected_connack() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(accept_connack(listener, 5));

        let connector = MqttConnector::new(MqttOptions::new("127.0.0.1", port, "dev1"));
        let err = connector.connect().await.err().unwrap();
        assert_eq!(
            err,
            TransportConnectError::Rejected {
                code: 5,
                reason: "not authorized".to_string(),
            }
        );
        drop(broker.await.unwrap());
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = MqttConnector::new(MqttOptions::new("127.0.0.1", port, "dev1"));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, TransportConnectError::Refused { .. }), "{err:?}");
    }

    /// PUBLISH, пришедший до SUBACK, не теряется и подтверждается.
    #[tokio::test]
    async fn test_subscribe_buffers_interleaved_publish() {
        let (mut transport, mut broker) = transport_pair();

        let server = tokio::spawn(async move {
            let id = match broker.read().await {
                Packet::Subscribe(s) => {
                    assert_eq!(s.filters, vec![("menu/#".to_string(), QoS::AtLeastOnce)]);
                    s.packet_id
                }
                other => panic!("expected SUBSCRIBE, got {other:?}"),
            };
            broker
                .write(publish("menu/up", QoS::AtLeastOnce, Some(42)))
                .await;
            broker
                .write(Packet::SubAck(SubAck {
                    packet_id: id,
                    return_codes: vec![1],
                }))
                .await;
            broker.read().await
        });

        transport.subscribe("menu/#", QoS::AtLeastOnce).await.unwrap();
        let msg = transport.poll_inbound().await.unwrap().unwrap();
        assert_eq!(msg.topic, "menu/up");
        assert_eq!(msg.qos, QoS::AtLeastOnce);

        assert_eq!(server.await.unwrap(), Packet::PubAck { packet_id: 42 });
    }

    /// Повтор QoS 2 PUBLISH до PUBREL подтверждается, но доставляется один
    /// раз; после PUBREL тот же id снова означает новое сообщение.
    #[tokio::test]
    async fn test_qos2_redelivery_before_pubrel_is_delivered_once() {
        let (mut transport, mut broker) = transport_pair();
        let redelivery = || {
            Packet::Publish(Publish {
                topic: "cmd/reset".to_string(),
                packet_id: Some(7),
                payload: Bytes::from_static(b"now"),
                qos: QoS::ExactlyOnce,
                dup: true,
                retain: false,
            })
        };

        broker.write(publish("cmd/reset", QoS::ExactlyOnce, Some(7))).await;
        broker.write(redelivery()).await;
        assert_eq!(transport.poll_inbound().await.unwrap().unwrap().topic, "cmd/reset");
        assert_eq!(transport.poll_inbound().await.unwrap(), None);
        assert_eq!(broker.read().await, Packet::PubRec { packet_id: 7 });
        assert_eq!(broker.read().await, Packet::PubRec { packet_id: 7 });

        broker.write(Packet::PubRel { packet_id: 7 }).await;
        assert_eq!(transport.poll_inbound().await.unwrap(), None);
        assert_eq!(broker.read().await, Packet::PubComp { packet_id: 7 });

        broker.write(publish("cmd/menu", QoS::ExactlyOnce, Some(7))).await;
        assert_eq!(transport.poll_inbound().await.unwrap().unwrap().topic, "cmd/menu");
        assert_eq!(broker.read().await, Packet::PubRec { packet_id: 7 });
    }

    #[tokio::test]
    async fn test_poll_inbound_does_not_wait() {
        let (mut transport, mut broker) = transport_pair();
        assert_eq!(transport.poll_inbound().await.unwrap(), None);

        broker.write(publish("a/b", QoS::AtMostOnce, None)).await;
        broker.write(publish("a/c", QoS::AtMostOnce, None)).await;
        assert_eq!(transport.poll_inbound().await.unwrap().unwrap().topic, "a/b");
        assert_eq!(transport.poll_inbound().await.unwrap().unwrap().topic, "a/c");
        assert_eq!(transport.poll_inbound().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_poll_inbound_reports_closed_peer() {
        let (mut transport, broker) = transport_pair();
        drop(broker);
        assert_eq!(transport.poll_inbound().await, Err(TransportIoError::Closed));
    }

    #[tokio::test]
    async fn test_ping_waits_for_pingresp() {
        let (mut transport, mut broker) = transport_pair();
        let server = tokio::spawn(async move {
            assert_eq!(broker.read().await, Packet::PingReq);
            broker.write(Packet::PingResp).await;
            broker
        });
        transport.ping().await.unwrap();
        drop(server.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_times_out_without_answer() {
        let (mut transport, _broker) = transport_pair();
        let err = transport.ping().await.unwrap_err();
        assert!(matches!(err, TransportIoError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_qos1_publish_gets_packet_ids() {
        let (mut transport, mut broker) = transport_pair();
        for _ in 0..2 {
            transport
                .publish("t", Bytes::new(), false, QoS::AtLeastOnce)
                .await
                .unwrap();
        }
        let ids: Vec<_> = [broker.read().await, broker.read().await]
            .into_iter()
            .map(|p| match p {
                Packet::Publish(p) => p.packet_id,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(ids, vec![Some(1), Some(2)]);
    }
}
