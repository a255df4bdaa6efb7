use std::{
    io::{self, ErrorKind},
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use psos_error::ErrorExt;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    select,
    sync::{watch, Notify},
    time::timeout,
};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{encode_line, parse_request, Request, Response};
use crate::pubsub::{delivery_queue, DeliveryQueue, QueueHandle, Router};

/// Настройки сервера прокси.
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    pub listen: String,
    /// Клиент, молчащий дольше этого, отключается.
    pub idle_timeout: Duration,
    pub write_timeout: Duration,
}

/// Общее состояние всех сессий.
struct Shared {
    router: Router,
    config: ProxyServerConfig,
    /// Зарегистрированные `cid`
    sessions: DashMap<String, u32>,
    /// Будит `con`, ожидающий освобождения занятого `cid`
    released: Notify,
    /// `true` после запроса остановки; флаг не сбрасывается
    shutdown: watch::Sender<bool>,
    active_connections: AtomicUsize,
    connection_counter: AtomicU32,
}

/// TCP-сервер, через который устройства без TLS получают доступ к
/// маршрутизатору (а через него к брокеру).
pub struct ProxyServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

/// Зарегистрированный клиент: своя очередь доставки.
struct Session {
    cid: String,
    handle: QueueHandle,
    queue: DeliveryQueue,
}

/// Обработчик одного TCP-клиента.
struct ProxyConnection {
    connection_id: u32,
    addr: SocketAddr,
    shared: Arc<Shared>,
    session: Option<Session>,
}

impl ProxyServer {
    pub async fn bind(
        config: ProxyServerConfig,
        router: Router,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen).await?;
        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                router,
                config,
                sessions: DashMap::new(),
                released: Notify::new(),
                shutdown: watch::Sender::new(false),
                active_connections: AtomicUsize::new(0),
                connection_counter: AtomicU32::new(0),
            }),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn active_connections(&self) -> usize {
        self.shared.active_connections.load(Ordering::Relaxed)
    }

    /// Хэндл для остановки сервера из другой задачи.
    pub fn shutdown_handle(&self) -> ProxyShutdown {
        ProxyShutdown {
            shared: self.shared.clone(),
        }
    }

    /// Принимает клиентов до вызова [`ProxyShutdown::shutdown`].
    pub async fn run(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Proxy server listening");
        let stopped = self.shared.stopped();
        tokio::pin!(stopped);
        loop {
            select! {
                _ = &mut stopped => {
                    info!("Proxy server stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (socket, addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept proxy client");
                            continue;
                        }
                    };
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        ProxyConnection::open(shared, addr).serve(socket).await;
                    });
                }
            }
        }
    }
}

/// Останавливает приём клиентов и закрывает текущие сессии.
#[derive(Clone)]
pub struct ProxyShutdown {
    shared: Arc<Shared>,
}

impl ProxyShutdown {
    pub fn shutdown(&self) {
        info!("Initiating proxy server shutdown");
        self.shared.shutdown.send_replace(true);
    }
}

impl Shared {
    /// Завершается, когда запрошена остановка, в том числе если запрос
    /// пришёл раньше первого опроса.
    async fn stopped(&self) {
        let mut rx = self.shutdown.subscribe();
        // отправитель живёт в `Shared`, закрыться канал не может
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl ProxyConnection {
    fn open(
        shared: Arc<Shared>,
        addr: SocketAddr,
    ) -> Self {
        let connection_id = shared.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let active = shared.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        info!(connection_id, %addr, active, "Proxy client connected");
        Self {
            connection_id,
            addr,
            shared,
            session: None,
        }
    }

    async fn serve(
        mut self,
        socket: TcpStream,
    ) {
        let (read_half, mut writer) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let shared = self.shared.clone();
        let stopped = shared.stopped();
        tokio::pin!(stopped);

        // остановка прерывает и ожидание строки, и ожидание занятого `cid`
        loop {
            select! {
                _ = &mut stopped => {
                    debug!(connection_id = self.connection_id, "Closing on shutdown");
                    break;
                }
                keep = self.step(&mut lines, &mut writer) => {
                    if !keep {
                        break;
                    }
                }
            }
        }

        self.close(writer).await;
    }

    /// Читает и обрабатывает один запрос. `false` закрывает соединение.
    async fn step(
        &mut self,
        lines: &mut Lines<BufReader<OwnedReadHalf>>,
        writer: &mut OwnedWriteHalf,
    ) -> bool {
        let line = match timeout(self.shared.config.idle_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                debug!(connection_id = self.connection_id, "Client closed connection");
                return false;
            }
            Ok(Err(e)) => {
                if is_recoverable_error(&e) {
                    debug!(connection_id = self.connection_id, error = %e, "Read failed");
                } else {
                    error!(connection_id = self.connection_id, error = %e, "Fatal read error");
                }
                return false;
            }
            Err(_) => {
                info!(connection_id = self.connection_id, addr = %self.addr, "Idle timeout");
                return false;
            }
        };
        if line.trim().is_empty() {
            return true;
        }

        trace!(connection_id = self.connection_id, line = line.trim(), "Request");
        let response = self.process(&line).await;
        if let Err(e) = send_response(writer, &response, self.shared.config.write_timeout).await {
            debug!(connection_id = self.connection_id, error = %e, "Failed to send response");
            return false;
        }
        true
    }

    async fn process(
        &mut self,
        line: &str,
    ) -> Response {
        let request = match parse_request(line) {
            Ok(request) => request,
            Err(e) => return Response::error(format!("invalid request: {e}")),
        };

        if request == Request::Nop {
            return Response::Nop;
        }
        let session = match self.session.as_mut() {
            Some(session) => session,
            None => {
                return match request {
                    Request::Con { cid } => self.register(cid).await,
                    _ => Response::error("client not connected"),
                }
            }
        };

        match request {
            Request::Nop => Response::Nop,
            Request::Con { .. } => Response::error("client already connected"),
            Request::Sub { topic, qos } => {
                match self.shared.router.subscribe(&topic, &session.handle, qos) {
                    Ok(_) => {
                        debug!(cid = %session.cid, filter = %topic, "Proxy subscribe");
                        Response::Sub { topic, qos }
                    }
                    Err(e) => Response::error(e.client_message()),
                }
            }
            Request::Pub {
                topic,
                payload,
                retain,
                qos,
            } => {
                let body = Bytes::from(payload.clone().into_bytes());
                match self.shared.router.publish(&topic, body, retain, qos) {
                    Ok(route) => {
                        debug!(cid = %session.cid, topic = %topic, ?route, "Proxy publish");
                        Response::Pub {
                            topic,
                            payload,
                            retain,
                            qos,
                        }
                    }
                    Err(e) => Response::error(e.client_message()),
                }
            }
            Request::Rcv => match session.queue.try_recv() {
                Ok(envelope) => Response::Rcv {
                    topic: envelope.topic.to_string(),
                    payload: envelope.payload_str().into_owned(),
                },
                Err(_) => Response::Nop,
            },
        }
    }

    /// Регистрирует `cid`. Если он занят, ждёт завершения прежней сессии.
    async fn register(
        &mut self,
        cid: String,
    ) -> Response {
        if cid.is_empty() {
            return Response::error("cid required for connection");
        }

        loop {
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.shared.sessions.entry(cid.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(self.connection_id);
                    break;
                }
                Entry::Occupied(_) => {
                    debug!(cid = %cid, "cid in use, waiting for previous session");
                }
            }
            released.await;
        }

        let (handle, queue) = delivery_queue();
        info!(cid = %cid, connection_id = self.connection_id, "Proxy client registered");
        self.session = Some(Session {
            cid: cid.clone(),
            handle,
            queue,
        });
        Response::Con { payload: cid }
    }

    async fn close(
        self,
        mut writer: OwnedWriteHalf,
    ) {
        if let Some(session) = self.session {
            let removed = self.shared.router.unsubscribe(&session.handle);
            self.shared.sessions.remove(&session.cid);
            self.shared.released.notify_waiters();
            info!(cid = %session.cid, removed, "Proxy client session closed");
        }

        if let Err(e) = writer.shutdown().await {
            if e.kind() != ErrorKind::NotConnected {
                debug!(connection_id = self.connection_id, error = %e, "Error during shutdown");
            }
        }
        let remaining = self.shared.active_connections.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(connection_id = self.connection_id, remaining, "Proxy connection closed");
    }
}

async fn send_response(
    writer: &mut OwnedWriteHalf,
    response: &Response,
    write_timeout: Duration,
) -> io::Result<()> {
    let line = encode_line(response).map_err(io::Error::other)?;
    timeout(write_timeout, writer.write_all(line.as_bytes()))
        .await
        .map_err(|_| io::Error::new(ErrorKind::TimedOut, "write timeout"))?
}

fn is_recoverable_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::InvalidData
            | ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8123".to_string(),
            idle_timeout: Duration::from_secs(20),
            write_timeout: Duration::from_secs(5),
        }
    }
}
