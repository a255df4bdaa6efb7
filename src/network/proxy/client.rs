use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use psos_error::{TransportConnectError, TransportIoError};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::timeout,
};
use tracing::{debug, warn};

use super::protocol::{encode_line, parse_response, Request, Response};
use crate::{
    network::{Connector, InboundMessage, Transport},
    pubsub::QoS,
};

/// Подключается к брокеру через `ProxyServer` другого устройства в LAN.
///
/// Трафик не шифруется; предназначено только для доверенных сетей.
#[derive(Debug, Clone)]
pub struct ProxyConnector {
    address: String,
    cid: String,
    io_timeout: Duration,
}

/// Сессия с сервером прокси: один запрос, один ответ.
pub struct ProxyTransport {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    io_timeout: Duration,
}

impl ProxyConnector {
    pub fn new(
        address: impl Into<String>,
        cid: impl Into<String>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            cid: cid.into(),
            io_timeout,
        }
    }
}

#[async_trait]
impl Connector for ProxyConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, TransportConnectError> {
        let stream = timeout(self.io_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| TransportConnectError::Timeout {
                address: self.address.clone(),
            })?
            .map_err(|e| TransportConnectError::Refused {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        let mut transport = ProxyTransport::new(stream, self.io_timeout);
        let response = transport
            .request(&Request::Con {
                cid: self.cid.clone(),
            })
            .await
            .map_err(|e| match e {
                TransportIoError::Timeout { .. } => TransportConnectError::Timeout {
                    address: self.address.clone(),
                },
                other => TransportConnectError::Protocol {
                    reason: other.to_string(),
                },
            })?;

        match response {
            Response::Con { payload } if payload == self.cid => {
                debug!(address = %self.address, cid = %self.cid, "Proxy session established");
                Ok(Box::new(transport))
            }
            Response::Err { payload } => Err(TransportConnectError::Rejected { code: 0, reason: payload }),
            other => Err(TransportConnectError::Protocol {
                reason: format!("unexpected connection response: {}", other.func()),
            }),
        }
    }

    fn endpoint(&self) -> String {
        format!("proxy://{}", self.address)
    }
}

impl ProxyTransport {
    fn new(
        stream: TcpStream,
        io_timeout: Duration,
    ) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read_half).lines(),
            writer,
            io_timeout,
        }
    }

    async fn request(
        &mut self,
        request: &Request,
    ) -> Result<Response, TransportIoError> {
        let line = encode_line(request).map_err(|e| TransportIoError::Protocol {
            reason: e.to_string(),
        })?;
        timeout(self.io_timeout, self.writer.write_all(line.as_bytes()))
            .await
            .map_err(|_| TransportIoError::Timeout { operation: "write" })?
            .map_err(|e| TransportIoError::from_io("write", &e))?;

        let reply = timeout(self.io_timeout, self.lines.next_line())
            .await
            .map_err(|_| TransportIoError::Timeout { operation: "read" })?
            .map_err(|e| TransportIoError::from_io("read", &e))?
            .ok_or(TransportIoError::Closed)?;

        parse_response(&reply).map_err(|e| TransportIoError::Protocol {
            reason: format!("invalid proxy response: {e}"),
        })
    }

    /// Ответ `err` на pub/sub не рвёт сессию: запрос отклонён, связь жива.
    fn expect(
        response: Response,
        func: &'static str,
    ) -> Result<(), TransportIoError> {
        match response {
            Response::Err { payload } => {
                warn!(func, reason = %payload, "Proxy server rejected request");
                Ok(())
            }
            other if other.func() == func => Ok(()),
            other => Err(TransportIoError::Protocol {
                reason: format!("expected '{func}' response, got '{}'", other.func()),
            }),
        }
    }
}

#[async_trait]
impl Transport for ProxyTransport {
    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        retain: bool,
        qos: QoS,
    ) -> Result<(), TransportIoError> {
        let response = self
            .request(&Request::Pub {
                topic: topic.to_string(),
                payload: String::from_utf8_lossy(&payload).into_owned(),
                retain,
                qos,
            })
            .await?;
        Self::expect(response, "pub")
    }

    async fn subscribe(
        &mut self,
        filter: &str,
        qos: QoS,
    ) -> Result<(), TransportIoError> {
        let response = self
            .request(&Request::Sub {
                topic: filter.to_string(),
                qos,
            })
            .await?;
        Self::expect(response, "sub")
    }

    async fn ping(&mut self) -> Result<(), TransportIoError> {
        let response = self.request(&Request::Nop).await?;
        Self::expect(response, "nop")
    }

    async fn poll_inbound(&mut self) -> Result<Option<InboundMessage>, TransportIoError> {
        match self.request(&Request::Rcv).await? {
            Response::Rcv { topic, payload } => Ok(Some(InboundMessage {
                topic,
                payload: Bytes::from(payload.into_bytes()),
                qos: QoS::AtMostOnce,
                retain: false,
            })),
            Response::Nop => Ok(None),
            other => Err(TransportIoError::Protocol {
                reason: format!("expected 'rcv' response, got '{}'", other.func()),
            }),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Proxy shutdown failed");
        }
    }
}
