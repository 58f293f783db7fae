//! Socket Framing
//!
//! Text packets of Engine.IO v3 carrying Socket.IO v2, as spoken by the
//! game server over a plain WebSocket.
//!
//! ```text
//! 0{"sid":..,"pingInterval":..}   open
//! 2 / 3                           ping / pong
//! 40 / 41                         socket connect / disconnect
//! 42["event",arg..]               event
//! 4217["event",arg..]             event expecting ack #17
//! 4317[arg..]                     ack #17
//! 44"reason"                      socket error
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Empty frame.
    #[error("empty frame")]
    Empty,
    /// Unknown Engine.IO packet type.
    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),
    /// Unknown Socket.IO packet type.
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),
    /// Payload is not valid JSON.
    #[error("invalid payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Event payload is not `["name", ...]`.
    #[error("event payload has no name")]
    MissingEventName,
    /// Ack without an id.
    #[error("ack without id")]
    MissingAckId,
}

/// Engine.IO open handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Session id.
    pub sid: String,
    /// Heartbeat interval (ms).
    pub ping_interval: u64,
    /// Heartbeat timeout (ms).
    pub ping_timeout: u64,
}

/// Socket.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Namespace connected.
    Connect,
    /// Namespace disconnected.
    Disconnect,
    /// Named event.
    Event {
        /// Ack id, when the sender wants a reply.
        id: Option<u64>,
        /// Event name.
        name: String,
        /// Arguments.
        args: Vec<Value>,
    },
    /// Reply to an event.
    Ack {
        /// Ack id of the event being answered.
        id: u64,
        /// Reply arguments.
        args: Vec<Value>,
    },
    /// Namespace error.
    Error(Value),
}

/// Engine.IO frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Connection opened.
    Open(Handshake),
    /// Connection closing.
    Close,
    /// Heartbeat.
    Ping(String),
    /// Heartbeat reply.
    Pong(String),
    /// Socket.IO payload.
    Message(Packet),
    /// Transport upgrade.
    Upgrade,
    /// No-op.
    Noop,
}

impl Frame {
    /// Event frame, with an ack id when a reply is expected.
    pub fn event(name: &str, id: Option<u64>, args: Vec<Value>) -> Self {
        Frame::Message(Packet::Event {
            id,
            name: name.to_string(),
            args,
        })
    }

    /// Parse a text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let mut chars = text.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = chars.as_str();

        match kind {
            '0' => Ok(Frame::Open(serde_json::from_str(rest)?)),
            '1' => Ok(Frame::Close),
            '2' => Ok(Frame::Ping(rest.to_string())),
            '3' => Ok(Frame::Pong(rest.to_string())),
            '4' => Ok(Frame::Message(decode_packet(rest)?)),
            '5' => Ok(Frame::Upgrade),
            '6' => Ok(Frame::Noop),
            other => Err(FrameError::UnknownEngineType(other)),
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> String {
        match self {
            Frame::Open(handshake) => {
                format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
            }
            Frame::Close => "1".to_string(),
            Frame::Ping(payload) => format!("2{}", payload),
            Frame::Pong(payload) => format!("3{}", payload),
            Frame::Message(packet) => format!("4{}", encode_packet(packet)),
            Frame::Upgrade => "5".to_string(),
            Frame::Noop => "6".to_string(),
        }
    }
}

fn decode_packet(text: &str) -> Result<Packet, FrameError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(FrameError::Empty)?;
    let mut rest = chars.as_str();

    // Namespaced packets: "/nsp,<payload>"
    if rest.starts_with('/') {
        rest = match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = rest[..digits].parse::<u64>().ok();
    let payload = &rest[digits..];

    match kind {
        '0' => Ok(Packet::Connect),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            let mut args = parse_args(payload)?;
            if args.is_empty() {
                return Err(FrameError::MissingEventName);
            }
            let name = match args.remove(0) {
                Value::String(name) => name,
                _ => return Err(FrameError::MissingEventName),
            };
            Ok(Packet::Event { id, name, args })
        }
        '3' => Ok(Packet::Ack {
            id: id.ok_or(FrameError::MissingAckId)?,
            args: parse_args(payload)?,
        }),
        '4' => Ok(Packet::Error(if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(payload)?
        })),
        other => Err(FrameError::UnknownSocketType(other)),
    }
}

fn parse_args(payload: &str) -> Result<Vec<Value>, FrameError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str(payload)? {
        Value::Array(items) => Ok(items),
        other => Ok(vec![other]),
    }
}

fn encode_packet(packet: &Packet) -> String {
    let id = |id: Option<u64>| id.map(|id| id.to_string()).unwrap_or_default();
    match packet {
        Packet::Connect => "0".to_string(),
        Packet::Disconnect => "1".to_string(),
        Packet::Event { id: ack, name, args } => {
            let mut items = Vec::with_capacity(args.len() + 1);
            items.push(Value::String(name.clone()));
            items.extend(args.iter().cloned());
            format!("2{}{}", id(*ack), Value::Array(items))
        }
        Packet::Ack { id: ack, args } => {
            format!("3{}{}", ack, Value::Array(args.clone()))
        }
        Packet::Error(value) => format!("4{}", value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open() {
        let text = r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":60000}"#;
        let frame = Frame::decode(text).unwrap();
        assert_eq!(
            frame,
            Frame::Open(Handshake {
                sid: "abc".to_string(),
                ping_interval: 25000,
                ping_timeout: 60000,
            })
        );
    }

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(Frame::decode("2").unwrap(), Frame::Ping(String::new()));
        assert_eq!(Frame::decode("3ack").unwrap(), Frame::Pong("ack".to_string()));
    }

    #[test]
    fn test_decode_event() {
        let frame = Frame::decode(r#"42["game_tick",{"elapsed":1500}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::event("game_tick", None, vec![json!({"elapsed": 1500})])
        );
    }

    #[test]
    fn test_decode_event_with_ack_id() {
        let frame = Frame::decode(r#"4212["place_bet",100,200]"#).unwrap();
        assert_eq!(
            frame,
            Frame::event("place_bet", Some(12), vec![json!(100), json!(200)])
        );
    }

    #[test]
    fn test_decode_ack() {
        let frame = Frame::decode(r#"433[null,{"state":"ENDED"}]"#).unwrap();
        assert_eq!(
            frame,
            Frame::Message(Packet::Ack {
                id: 3,
                args: vec![Value::Null, json!({"state": "ENDED"})],
            })
        );
    }

    #[test]
    fn test_decode_namespaced_event() {
        let frame = Frame::decode(r#"42/game,["game_tick",150]"#).unwrap();
        assert_eq!(frame, Frame::event("game_tick", None, vec![json!(150)]));
    }

    #[test]
    fn test_decode_connect_and_error() {
        assert_eq!(Frame::decode("40").unwrap(), Frame::Message(Packet::Connect));
        assert_eq!(
            Frame::decode(r#"44"not authorized""#).unwrap(),
            Frame::Message(Packet::Error(json!("not authorized")))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(Frame::decode(""), Err(FrameError::Empty)));
        assert!(matches!(Frame::decode("9"), Err(FrameError::UnknownEngineType('9'))));
        assert!(matches!(Frame::decode("42[1,2]"), Err(FrameError::MissingEventName)));
        assert!(matches!(Frame::decode("43[null]"), Err(FrameError::MissingAckId)));
        assert!(matches!(Frame::decode("42[oops"), Err(FrameError::InvalidJson(_))));
    }

    #[test]
    fn test_encode_event_with_ack() {
        let frame = Frame::event("join", Some(0), vec![json!({"ott": "token"})]);
        assert_eq!(frame.encode(), r#"420["join",{"ott":"token"}]"#);
    }

    #[test]
    fn test_encode_bare_event() {
        assert_eq!(Frame::event("cash_out", Some(4), vec![]).encode(), r#"424["cash_out"]"#);
        assert_eq!(Frame::Ping(String::new()).encode(), "2");
        assert_eq!(Frame::Pong(String::new()).encode(), "3");
    }
}
