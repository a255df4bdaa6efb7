//! Строчный JSON-протокол LAN-прокси.
//!
//! Каждый запрос и каждый ответ занимает одну строку. Поле `func` задаёт
//! операцию; ответ повторяет `func` запроса либо равен `err`/`nop`.

use serde::{Deserialize, Serialize};

use crate::pubsub::QoS;

/// Запрос клиента прокси.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "func", rename_all = "lowercase")]
pub enum Request {
    /// Регистрация клиента; обязана быть первой.
    Con { cid: String },
    Sub {
        topic: String,
        #[serde(default)]
        qos: QoS,
    },
    Pub {
        topic: String,
        #[serde(default)]
        payload: String,
        #[serde(default)]
        retain: bool,
        #[serde(default)]
        qos: QoS,
    },
    /// Забрать одно сообщение из очереди клиента.
    Rcv,
    /// Проверка живости, не требует регистрации.
    Nop,
}

/// Ответ сервера прокси.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "func", rename_all = "lowercase")]
pub enum Response {
    /// `payload` содержит принятый `cid`.
    Con { payload: String },
    Sub { topic: String, qos: QoS },
    Pub {
        topic: String,
        payload: String,
        retain: bool,
        qos: QoS,
    },
    Rcv { topic: String, payload: String },
    /// Очередь пуста, либо ответ на `nop`.
    Nop,
    Err { payload: String },
}

impl Response {
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Err {
            payload: reason.into(),
        }
    }

    pub fn func(&self) -> &'static str {
        match self {
            Self::Con { .. } => "con",
            Self::Sub { .. } => "sub",
            Self::Pub { .. } => "pub",
            Self::Rcv { .. } => "rcv",
            Self::Nop => "nop",
            Self::Err { .. } => "err",
        }
    }
}

/// Сериализует сообщение в строку с завершающим `\n`.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

pub fn parse_request(line: &str) -> Result<Request, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

pub fn parse_response(line: &str) -> Result<Response, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(r#"{"func":"con","cid":"a1b2"}"#, Request::Con { cid: "a1b2".into() })]
    #[case(r#"{"func":"sub","topic":"menu/#"}"#, Request::Sub { topic: "menu/#".into(), qos: QoS::AtMostOnce })]
    #[case(
        r#"{"func":"pub","topic":"t","payload":"on","retain":true,"qos":1}"#,
        Request::Pub { topic: "t".into(), payload: "on".into(), retain: true, qos: QoS::AtLeastOnce }
    )]
    #[case(r#"{"func":"pub","topic":"t"}"#, Request::Pub { topic: "t".into(), payload: String::new(), retain: false, qos: QoS::AtMostOnce })]
    #[case(r#"{"func":"rcv"}"#, Request::Rcv)]
    #[case("{\"func\":\"nop\"}\n", Request::Nop)]
    fn test_parse_request(
        #[case] line: &str,
        #[case] expected: Request,
    ) {
        assert_eq!(parse_request(line).unwrap(), expected);
    }

    #[rstest]
    #[case(r#"{"topic":"t"}"#)]
    #[case(r#"{"func":"dance"}"#)]
    #[case(r#"{"func":"sub","topic":"t","qos":3}"#)]
    #[case(r#"{"func":"con"}"#)]
    #[case("not json")]
    fn test_parse_request_rejects(#[case] line: &str) {
        assert!(parse_request(line).is_err());
    }

    #[test]
    fn test_response_wire_format() {
        let line = encode_line(&Response::Rcv {
            topic: "a/b".into(),
            payload: "1".into(),
        })
        .unwrap();
        assert_eq!(line, "{\"func\":\"rcv\",\"topic\":\"a/b\",\"payload\":\"1\"}\n");

        assert_eq!(encode_line(&Response::Nop).unwrap(), "{\"func\":\"nop\"}\n");
        assert_eq!(
            encode_line(&Response::error("client not connected")).unwrap(),
            "{\"func\":\"err\",\"payload\":\"client not connected\"}\n"
        );
    }

    #[test]
    fn test_response_func_matches_tag() {
        let resp = Response::Sub {
            topic: "x".into(),
            qos: QoS::ExactlyOnce,
        };
        let json: serde_json::Value = serde_json::from_str(&encode_line(&resp).unwrap()).unwrap();
        assert_eq!(json["func"], resp.func());
        assert_eq!(json["qos"], 2);
        assert_eq!(parse_response(&encode_line(&resp).unwrap()).unwrap(), resp);
    }
}
