//! Пакеты MQTT 3.1.1 и их кодек.
//!
//! Поддерживается подмножество, нужное клиенту маршрутизатора: CONNECT,
//! CONNACK, PUBLISH и подтверждения QoS 1/2, SUBSCRIBE/SUBACK,
//! PINGREQ/PINGRESP, DISCONNECT. Декодер инкрементальный: пока пакет
//! не пришёл целиком, буфер не изменяется.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use psos_error::ProtocolError;

use crate::pubsub::QoS;

pub const PROTOCOL_NAME: &str = "MQTT";
pub const PROTOCOL_LEVEL: u8 = 4;

/// Максимум, кодируемый четырьмя байтами Remaining Length.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Предел размера входящего пакета по умолчанию.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 256 * 1024;

/// Код возврата SUBACK для отклонённого фильтра.
pub const SUBACK_FAILURE: u8 = 0x80;

const CONNECT_FLAG_USERNAME: u8 = 0x80;
const CONNECT_FLAG_PASSWORD: u8 = 0x40;
const CONNECT_FLAG_WILL: u8 = 0x04;
const CONNECT_FLAG_CLEAN_SESSION: u8 = 0x02;
const CONNECT_FLAG_RESERVED: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    /// Keep-alive в секундах.
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<Bytes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    /// Присутствует только при QoS > 0.
    pub packet_id: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub dup: bool,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: u16,
    pub filters: Vec<(String, QoS)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAck {
    pub packet_id: u16,
    /// Выданный QoS для каждого фильтра или [`SUBACK_FAILURE`].
    pub return_codes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck { packet_id: u16 },
    PubRec { packet_id: u16 },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    Subscribe(Subscribe),
    SubAck(SubAck),
    PingReq,
    PingResp,
    Disconnect,
}

/// Кодек с ограничением размера входящих пакетов.
#[derive(Debug, Clone, Copy)]
pub struct MqttCodec {
    max_packet_size: usize,
}

impl PacketType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            _ => return None,
        })
    }

    /// Обязательные флаги фиксированного заголовка; `None` для PUBLISH,
    /// где флаги несут dup/qos/retain.
    fn fixed_flags(self) -> Option<u8> {
        match self {
            Self::Publish => None,
            Self::PubRel | Self::Subscribe => Some(0b0010),
            _ => Some(0),
        }
    }
}

impl ConnAck {
    pub const ACCEPTED: u8 = 0;

    /// Текстовое описание кода возврата CONNACK.
    pub fn reason(code: u8) -> &'static str {
        match code {
            0 => "connection accepted",
            1 => "unacceptable protocol version",
            2 => "identifier rejected",
            3 => "server unavailable",
            4 => "bad user name or password",
            5 => "not authorized",
            _ => "unknown return code",
        }
    }
}

impl Publish {
    fn flags(&self) -> u8 {
        (u8::from(self.dup) << 3) | (self.qos.as_u8() << 1) | u8::from(self.retain)
    }
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnAck(_) => PacketType::ConnAck,
            Self::Publish(_) => PacketType::Publish,
            Self::PubAck { .. } => PacketType::PubAck,
            Self::PubRec { .. } => PacketType::PubRec,
            Self::PubRel { .. } => PacketType::PubRel,
            Self::PubComp { .. } => PacketType::PubComp,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubAck(_) => PacketType::SubAck,
            Self::PingReq => PacketType::PingReq,
            Self::PingResp => PacketType::PingResp,
            Self::Disconnect => PacketType::Disconnect,
        }
    }

    /// Записывает пакет целиком (заголовок, длина, тело) в `dst`.
    pub fn encode(
        &self,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let mut body = BytesMut::new();
        let flags = match self {
            Self::Connect(c) => {
                write_connect(c, &mut body)?;
                0
            }
            Self::ConnAck(a) => {
                body.put_u8(u8::from(a.session_present));
                body.put_u8(a.return_code);
                0
            }
            Self::Publish(p) => {
                write_string(&p.topic, &mut body)?;
                if p.qos != QoS::AtMostOnce {
                    let id = p.packet_id.ok_or_else(|| ProtocolError::InvalidMessage {
                        reason: "PUBLISH with QoS > 0 requires a packet id".to_string(),
                    })?;
                    body.put_u16(id);
                }
                body.extend_from_slice(&p.payload);
                p.flags()
            }
            Self::PubAck { packet_id } | Self::PubRec { packet_id } | Self::PubComp { packet_id } => {
                body.put_u16(*packet_id);
                0
            }
            Self::PubRel { packet_id } => {
                body.put_u16(*packet_id);
                0b0010
            }
            Self::Subscribe(s) => {
                body.put_u16(s.packet_id);
                for (filter, qos) in &s.filters {
                    write_string(filter, &mut body)?;
                    body.put_u8(qos.as_u8());
                }
                0b0010
            }
            Self::SubAck(a) => {
                body.put_u16(a.packet_id);
                body.extend_from_slice(&a.return_codes);
                0
            }
            Self::PingReq | Self::PingResp | Self::Disconnect => 0,
        };

        if body.len() > MAX_REMAINING_LENGTH {
            return Err(ProtocolError::PacketTooLarge {
                size: body.len(),
                max: MAX_REMAINING_LENGTH,
            });
        }

        dst.reserve(1 + 4 + body.len());
        dst.put_u8(((self.packet_type() as u8) << 4) | flags);
        write_remaining_length(body.len(), dst);
        dst.extend_from_slice(&body);
        Ok(())
    }

    /// Разбирает тело пакета по байту фиксированного заголовка.
    fn parse(
        header: u8,
        mut body: Bytes,
    ) -> Result<Self, ProtocolError> {
        let type_bits = header >> 4;
        let flags = header & 0x0F;
        let packet_type = PacketType::from_u8(type_bits).ok_or(ProtocolError::UnknownPacketType {
            packet_type: type_bits,
        })?;
        if let Some(expected) = packet_type.fixed_flags() {
            if flags != expected {
                return Err(ProtocolError::InvalidFlags {
                    packet_type: type_bits,
                    flags,
                });
            }
        }

        let packet = match packet_type {
            PacketType::Connect => Self::Connect(read_connect(&mut body)?),
            PacketType::ConnAck => {
                need(&body, 2)?;
                let ack_flags = body.get_u8();
                Self::ConnAck(ConnAck {
                    session_present: ack_flags & 0x01 != 0,
                    return_code: body.get_u8(),
                })
            }
            PacketType::Publish => Self::Publish(read_publish(flags, body)?),
            PacketType::PubAck => Self::PubAck {
                packet_id: read_u16(&mut body)?,
            },
            PacketType::PubRec => Self::PubRec {
                packet_id: read_u16(&mut body)?,
            },
            PacketType::PubRel => Self::PubRel {
                packet_id: read_u16(&mut body)?,
            },
            PacketType::PubComp => Self::PubComp {
                packet_id: read_u16(&mut body)?,
            },
            PacketType::Subscribe => Self::Subscribe(read_subscribe(&mut body)?),
            PacketType::SubAck => {
                let packet_id = read_u16(&mut body)?;
                Self::SubAck(SubAck {
                    packet_id,
                    return_codes: body.to_vec(),
                })
            }
            PacketType::PingReq => Self::PingReq,
            PacketType::PingResp => Self::PingResp,
            PacketType::Disconnect => Self::Disconnect,
        };
        Ok(packet)
    }
}

impl MqttCodec {
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(MAX_REMAINING_LENGTH),
        }
    }

    /// Извлекает из `src` один полный пакет.
    ///
    /// `Ok(None)` означает, что данных пока недостаточно; в этом случае `src`
    /// не изменяется.
    pub fn decode(
        &self,
        src: &mut BytesMut,
    ) -> Result<Option<Packet>, ProtocolError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = read_remaining_length(&src[1..])? else {
            return Ok(None);
        };
        if remaining > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: remaining,
                max: self.max_packet_size,
            });
        }

        let total = 1 + len_bytes + remaining;
        if src.len() < total {
            return Ok(None);
        }

        let header = src[0];
        let mut frame = src.split_to(total).freeze();
        frame.advance(1 + len_bytes);
        Packet::parse(header, frame).map(Some)
    }

    pub fn encode(
        &self,
        packet: &Packet,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        packet.encode(dst)
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Примитивы
////////////////////////////////////////////////////////////////////////////////

/// Декодирует Remaining Length. `Ok(None)`, если байты длины ещё не пришли.
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut value = 0usize;
    for (i, byte) in buf.iter().take(4).enumerate() {
        value |= usize::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        Err(ProtocolError::MalformedLength)
    } else {
        Ok(None)
    }
}

fn write_remaining_length(
    mut len: usize,
    dst: &mut BytesMut,
) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        dst.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

fn need(
    buf: &Bytes,
    n: usize,
) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::Truncated {
            needed: n - buf.remaining(),
        });
    }
    Ok(())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, ProtocolError> {
    need(buf, 2)?;
    Ok(buf.get_u16())
}

fn read_binary(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_u16(buf)? as usize;
    need(buf, len)?;
    Ok(buf.split_to(len))
}

fn read_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = read_binary(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8)
}

fn write_binary(
    data: &[u8],
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let len = u16::try_from(data.len()).map_err(|_| ProtocolError::PacketTooLarge {
        size: data.len(),
        max: u16::MAX as usize,
    })?;
    dst.put_u16(len);
    dst.extend_from_slice(data);
    Ok(())
}

fn write_string(
    s: &str,
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    write_binary(s.as_bytes(), dst)
}

fn read_qos(bits: u8) -> Result<QoS, ProtocolError> {
    QoS::try_from(bits).map_err(|e| ProtocolError::InvalidQos { value: e.value })
}

fn write_connect(
    c: &Connect,
    body: &mut BytesMut,
) -> Result<(), ProtocolError> {
    let mut flags = 0u8;
    if c.clean_session {
        flags |= CONNECT_FLAG_CLEAN_SESSION;
    }
    if c.username.is_some() {
        flags |= CONNECT_FLAG_USERNAME;
    }
    if c.password.is_some() {
        flags |= CONNECT_FLAG_PASSWORD;
    }

    write_string(PROTOCOL_NAME, body)?;
    body.put_u8(PROTOCOL_LEVEL);
    body.put_u8(flags);
    body.put_u16(c.keep_alive);
    write_string(&c.client_id, body)?;
    if let Some(username) = &c.username {
        write_string(username, body)?;
    }
    if let Some(password) = &c.password {
        write_binary(password, body)?;
    }
    Ok(())
}

fn read_connect(body: &mut Bytes) -> Result<Connect, ProtocolError> {
    let name = read_string(body)?;
    need(body, 4)?;
    let level = body.get_u8();
    if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocol { name, level });
    }
    let flags = body.get_u8();
    if flags & CONNECT_FLAG_RESERVED != 0 {
        return Err(ProtocolError::InvalidFlags {
            packet_type: PacketType::Connect as u8,
            flags,
        });
    }
    let keep_alive = body.get_u16();
    let client_id = read_string(body)?;

    // will-сообщение клиенту маршрутизатора не нужно: читаем и отбрасываем
    if flags & CONNECT_FLAG_WILL != 0 {
        read_string(body)?;
        read_binary(body)?;
    }
    let username = if flags & CONNECT_FLAG_USERNAME != 0 {
        Some(read_string(body)?)
    } else {
        None
    };
    let password = if flags & CONNECT_FLAG_PASSWORD != 0 {
        Some(read_binary(body)?)
    } else {
        None
    };

    Ok(Connect {
        client_id,
        keep_alive,
        clean_session: flags & CONNECT_FLAG_CLEAN_SESSION != 0,
        username,
        password,
    })
}

fn read_publish(
    flags: u8,
    mut body: Bytes,
) -> Result<Publish, ProtocolError> {
    let qos = read_qos((flags >> 1) & 0b11)?;
    let topic = read_string(&mut body)?;
    if topic.is_empty() {
        return Err(ProtocolError::InvalidMessage {
            reason: "PUBLISH with empty topic".to_string(),
        });
    }
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        match read_u16(&mut body)? {
            0 => {
                return Err(ProtocolError::InvalidMessage {
                    reason: "packet id must be non-zero".to_string(),
                })
            }
            id => Some(id),
        }
    };

    Ok(Publish {
        topic,
        packet_id,
        payload: body,
        qos,
        dup: flags & 0b1000 != 0,
        retain: flags & 0b0001 != 0,
    })
}

fn read_subscribe(body: &mut Bytes) -> Result<Subscribe, ProtocolError> {
    let packet_id = read_u16(body)?;
    let mut filters = Vec::new();
    while body.has_remaining() {
        let filter = read_string(body)?;
        need(body, 1)?;
        let options = body.get_u8();
        if options & 0b1111_1100 != 0 {
            return Err(ProtocolError::InvalidQos { value: options });
        }
        filters.push((filter, read_qos(options)?));
    }
    if filters.is_empty() {
        return Err(ProtocolError::InvalidMessage {
            reason: "SUBSCRIBE without topic filters".to_string(),
        });
    }
    Ok(Subscribe { packet_id, filters })
}
