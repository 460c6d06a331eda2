//! Engine.IO v4 frames and the Socket.IO packets carried inside message frames.
//!
//! Engine.IO: `0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade, `6` noop.
//! Socket.IO: `<type>[<attachments>-][/<namespace>,][<ack id>][<json>]`.

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown packet type {0:?}")]
    UnknownType(char),
    #[error("invalid packet payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed packet: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineFrame {
    /// Handshake JSON (`sid`, `pingInterval`, …).
    Open(String),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EngineFrame {
    pub fn decode(frame: &str) -> Result<Self, FrameError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let rest = chars.as_str().to_string();
        Ok(match kind {
            '0' => EngineFrame::Open(rest),
            '1' => EngineFrame::Close,
            '2' => EngineFrame::Ping(rest),
            '3' => EngineFrame::Pong(rest),
            '4' => EngineFrame::Message(rest),
            '5' => EngineFrame::Upgrade,
            '6' => EngineFrame::Noop,
            other => return Err(FrameError::UnknownType(other)),
        })
    }

    pub fn encode(&self) -> String {
        match self {
            EngineFrame::Open(s) => format!("0{}", s),
            EngineFrame::Close => "1".to_string(),
            EngineFrame::Ping(s) => format!("2{}", s),
            EngineFrame::Pong(s) => format!("3{}", s),
            EngineFrame::Message(s) => format!("4{}", s),
            EngineFrame::Upgrade => "5".to_string(),
            EngineFrame::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: String,
        data: Option<serde_json::Value>,
    },
    Disconnect {
        namespace: String,
    },
    Event {
        namespace: String,
        ack_id: Option<u64>,
        name: String,
        args: Vec<serde_json::Value>,
    },
    Ack {
        namespace: String,
        ack_id: Option<u64>,
    },
    ConnectError {
        namespace: String,
        data: Option<serde_json::Value>,
    },
    /// Binary events and acks; attachments are not supported.
    Binary,
}

impl SocketPacket {
    pub fn decode(packet: &str) -> Result<Self, FrameError> {
        let mut chars = packet.chars();
        let kind = chars.next().ok_or(FrameError::Empty)?;
        let mut rest = chars.as_str();

        if kind == '5' || kind == '6' {
            return Ok(SocketPacket::Binary);
        }

        let namespace = match rest.strip_prefix('/') {
            Some(after) => {
                let end = after.find(',').unwrap_or(after.len());
                let ns = format!("/{}", &after[..end]);
                rest = after.get(end + 1..).unwrap_or("");
                ns
            }
            None => "/".to_string(),
        };

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack_id = if digits > 0 {
            let id = rest[..digits]
                .parse()
                .map_err(|_| FrameError::Malformed(format!("ack id in {:?}", packet)))?;
            rest = &rest[digits..];
            Some(id)
        } else {
            None
        };

        let data: Option<serde_json::Value> = if rest.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str(rest)?)
        };

        Ok(match kind {
            '0' => SocketPacket::Connect { namespace, data },
            '1' => SocketPacket::Disconnect { namespace },
            '2' => {
                let mut items = match data {
                    Some(serde_json::Value::Array(items)) => items,
                    _ => return Err(FrameError::Malformed("event payload is not an array".to_string())),
                };
                if items.is_empty() {
                    return Err(FrameError::Malformed("event without a name".to_string()));
                }
                let name = match items.remove(0) {
                    serde_json::Value::String(s) => s,
                    _ => return Err(FrameError::Malformed("event name is not a string".to_string())),
                };
                SocketPacket::Event {
                    namespace,
                    ack_id,
                    name,
                    args: items,
                }
            }
            '3' => SocketPacket::Ack { namespace, ack_id },
            '4' => SocketPacket::ConnectError { namespace, data },
            other => return Err(FrameError::UnknownType(other)),
        })
    }
}

/// Socket.IO connect to the default namespace, wrapped in an Engine.IO message.
pub fn connect_frame() -> String {
    EngineFrame::Message("0".to_string()).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn engine_frames() {
        assert_eq!(
            EngineFrame::decode(r#"0{"sid":"abc","pingInterval":25000}"#).unwrap(),
            EngineFrame::Open(r#"{"sid":"abc","pingInterval":25000}"#.to_string())
        );
        assert_eq!(EngineFrame::decode("2").unwrap(), EngineFrame::Ping(String::new()));
        assert_eq!(EngineFrame::Pong(String::new()).encode(), "3");
        assert_eq!(EngineFrame::decode("6").unwrap(), EngineFrame::Noop);
        assert!(matches!(EngineFrame::decode(""), Err(FrameError::Empty)));
        assert!(matches!(EngineFrame::decode("9"), Err(FrameError::UnknownType('9'))));
        assert_eq!(connect_frame(), "40");
    }

    #[test]
    fn event_packets() {
        let p = SocketPacket::decode(r#"2["new-message",{"text":"hi"}]"#).unwrap();
        assert_eq!(
            p,
            SocketPacket::Event {
                namespace: "/".to_string(),
                ack_id: None,
                name: "new-message".to_string(),
                args: vec![json!({"text": "hi"})],
            }
        );

        let p = SocketPacket::decode(r#"2/admin,13["typing-indicator",{}]"#).unwrap();
        assert!(matches!(
            p,
            SocketPacket::Event { ref namespace, ack_id: Some(13), ref name, .. }
                if namespace == "/admin" && name == "typing-indicator"
        ));
    }

    #[test]
    fn connect_and_errors() {
        assert_eq!(
            SocketPacket::decode(r#"0{"sid":"x"}"#).unwrap(),
            SocketPacket::Connect {
                namespace: "/".to_string(),
                data: Some(json!({"sid": "x"}))
            }
        );
        assert!(matches!(
            SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError { .. }
        ));
        assert!(matches!(SocketPacket::decode("2{}"), Err(FrameError::Malformed(_))));
        assert!(matches!(SocketPacket::decode("2[1]"), Err(FrameError::Malformed(_))));
        assert!(matches!(SocketPacket::decode("2[oops"), Err(FrameError::Json(_))));
        assert_eq!(SocketPacket::decode("51-[\"x\"]").unwrap(), SocketPacket::Binary);
    }
}
