//! Bridge socket listener: speaks Engine.IO over a websocket, answers pings, and forwards
//! filtered `new-message` events to the consumer.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::engineio::{connect_frame, EngineFrame, SocketPacket};
use super::filter::{AuthorizedMessage, FilterPolicy};
use crate::channels::InboundEvent;

pub const NEW_MESSAGE_EVENT: &str = "new-message";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("bridge rejected the connection: {0}")]
    Rejected(String),
    #[error("connection closed by bridge")]
    Closed,
}

pub struct BridgeListener {
    url: String,
    policy: FilterPolicy,
}

/// `ws://host:port/socket.io/?EIO=4&transport=websocket&password=…`
pub fn socket_url(ws_base: &str, token: &str) -> String {
    format!(
        "{}/socket.io/?EIO=4&transport=websocket&password={}",
        ws_base.trim_end_matches('/'),
        token
    )
}

impl BridgeListener {
    pub fn new(ws_base: &str, token: &str, policy: FilterPolicy) -> Self {
        Self {
            url: socket_url(ws_base, token),
            policy,
        }
    }

    /// Runs until the connection ends. Never reconnects. `on_connect` fires once the
    /// websocket is open. Accepted messages go to `tx` without waiting on the consumer, so
    /// pings are answered while a message is being processed. Returns Ok when the consumer
    /// has gone away.
    pub async fn run(
        self,
        tx: mpsc::UnboundedSender<AuthorizedMessage>,
        on_connect: impl FnOnce() + Send,
    ) -> Result<(), TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url).await?;
        log::info!("gateway: connected to bridge socket");
        on_connect();
        let (mut write, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            let text = match msg? {
                Message::Text(t) => t,
                Message::Close(_) => return Err(TransportError::Closed),
                _ => continue,
            };
            let frame = match EngineFrame::decode(&text) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("gateway: skipping undecodable frame: {}", e);
                    continue;
                }
            };
            match frame {
                EngineFrame::Open(handshake) => {
                    log::debug!("gateway: engine.io open {}", handshake);
                    write.send(Message::Text(connect_frame())).await?;
                }
                EngineFrame::Ping(data) => {
                    write.send(Message::Text(EngineFrame::Pong(data).encode())).await?;
                }
                EngineFrame::Message(packet) => {
                    let packet = match SocketPacket::decode(&packet) {
                        Ok(p) => p,
                        Err(e) => {
                            log::warn!("gateway: skipping undecodable packet: {}", e);
                            continue;
                        }
                    };
                    if !self.on_packet(packet, &tx)? {
                        log::info!("gateway: consumer stopped, closing listener");
                        return Ok(());
                    }
                }
                EngineFrame::Close => return Err(TransportError::Closed),
                EngineFrame::Pong(_) | EngineFrame::Upgrade | EngineFrame::Noop => {}
            }
        }
        Err(TransportError::Closed)
    }

    /// Returns false when the consumer channel is closed.
    fn on_packet(
        &self,
        packet: SocketPacket,
        tx: &mpsc::UnboundedSender<AuthorizedMessage>,
    ) -> Result<bool, TransportError> {
        match packet {
            SocketPacket::Connect { namespace, .. } => {
                log::info!("gateway: socket.io connected to {}", namespace);
            }
            SocketPacket::ConnectError { data, .. } => {
                let reason = data.map(|d| d.to_string()).unwrap_or_default();
                return Err(TransportError::Rejected(reason));
            }
            SocketPacket::Disconnect { .. } => return Err(TransportError::Closed),
            SocketPacket::Event { name, mut args, .. } if name == NEW_MESSAGE_EVENT => {
                if args.is_empty() {
                    log::debug!("gateway: new-message without payload");
                    return Ok(true);
                }
                let event = InboundEvent::from_bridge_payload(args.swap_remove(0));
                match self.policy.admit(event) {
                    Ok(msg) => {
                        log::info!("gateway: accepted message from {}", msg.event.sender_address);
                        return Ok(tx.send(msg).is_ok());
                    }
                    Err(rejection) => log::debug!("gateway: dropped event: {}", rejection),
                }
            }
            SocketPacket::Event { name, args, .. } => {
                log::info!("gateway: event {} {}", name, serde_json::Value::Array(args));
            }
            SocketPacket::Ack { .. } | SocketPacket::Binary => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn listener() -> BridgeListener {
        BridgeListener::new(
            "ws://localhost:1234/",
            "secret",
            FilterPolicy::new("iMessage", vec!["+1555".to_string()], None),
        )
    }

    fn new_message(text: &str, sender: &str) -> SocketPacket {
        SocketPacket::Event {
            namespace: "/".to_string(),
            ack_id: None,
            name: NEW_MESSAGE_EVENT.to_string(),
            args: vec![json!({
                "text": text,
                "isFromMe": false,
                "handle": {"address": sender, "service": "iMessage"}
            })],
        }
    }

    #[test]
    fn url_carries_handshake_params() {
        assert_eq!(
            listener().url,
            "ws://localhost:1234/socket.io/?EIO=4&transport=websocket&password=secret"
        );
    }

    #[test]
    fn accepted_events_are_forwarded_in_order() {
        let l = listener();
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(l.on_packet(new_message("first", "+1555"), &tx).unwrap());
        assert!(l.on_packet(new_message("dropped", "+1999"), &tx).unwrap());
        assert!(l.on_packet(new_message("second", "+1555"), &tx).unwrap());
        assert_eq!(rx.try_recv().unwrap().text, "first");
        assert_eq!(rx.try_recv().unwrap().text, "second");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn other_events_are_ignored_and_errors_end_the_listener() {
        let l = listener();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let typing = SocketPacket::Event {
            namespace: "/".to_string(),
            ack_id: None,
            name: "typing-indicator".to_string(),
            args: vec![json!({"display": true})],
        };
        assert!(l.on_packet(typing, &tx).unwrap());
        assert!(rx.try_recv().is_err());

        let err = l
            .on_packet(
                SocketPacket::ConnectError {
                    namespace: "/".to_string(),
                    data: Some(json!({"message": "bad password"})),
                },
                &tx,
            )
            .unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));
    }

    #[test]
    fn closed_consumer_stops_the_listener() {
        let l = listener();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!l.on_packet(new_message("hi", "+1555"), &tx).unwrap());
    }
}
