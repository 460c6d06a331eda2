//! Inbound event from a channel, delivered to the router once it passes the gateway filter.

pub const CHAT_PLATFORM_SERVICE: &str = "discord";

/// Where an inbound event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    ChatPlatform,
    Bridge,
}

/// One received message. Immutable; dropped after routing.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub origin: EventOrigin,
    /// Transport the bridge reported for the sender handle (e.g. "iMessage", "SMS").
    pub service: String,
    pub sender_address: String,
    /// First chat's identifier, when the payload lists chats.
    pub chat_id: Option<String>,
    /// Absent when the payload carried no string text (attachments, reactions).
    pub text: Option<String>,
    pub is_from_self: bool,
    pub raw: serde_json::Value,
}

impl InboundEvent {
    /// Parse a bridge `new-message` payload. Missing fields become empty values so the
    /// filter, not the parser, decides what to drop.
    pub fn from_bridge_payload(raw: serde_json::Value) -> Self {
        let str_at = |ptr: &str| {
            raw.pointer(ptr)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Self {
            origin: EventOrigin::Bridge,
            service: str_at("/handle/service").unwrap_or_default(),
            sender_address: str_at("/handle/address").unwrap_or_default(),
            chat_id: str_at("/chats/0/chatIdentifier"),
            text: str_at("/text"),
            is_from_self: raw
                .get("isFromMe")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            raw,
        }
    }

    /// A chat-platform message: the author is the sender, the channel is the chat.
    pub fn from_chat_message(
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let (author_id, channel_id, content) = (author_id.into(), channel_id.into(), content.into());
        let raw = serde_json::json!({
            "author": author_id,
            "channelId": channel_id,
            "content": content,
        });
        Self {
            origin: EventOrigin::ChatPlatform,
            service: CHAT_PLATFORM_SERVICE.to_string(),
            sender_address: author_id,
            chat_id: Some(channel_id),
            text: Some(content),
            is_from_self: false,
            raw,
        }
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bridge_payload_fields() {
        let e = InboundEvent::from_bridge_payload(json!({
            "text": "what's the wifi password at the office?",
            "isFromMe": false,
            "handle": {"address": "+15551234567", "service": "iMessage"},
            "chats": [{"chatIdentifier": "+15551234567"}, {"chatIdentifier": "other"}]
        }));
        assert_eq!(e.origin, EventOrigin::Bridge);
        assert_eq!(e.service, "iMessage");
        assert_eq!(e.sender_address, "+15551234567");
        assert_eq!(e.chat_id.as_deref(), Some("+15551234567"));
        assert_eq!(e.text(), "what's the wifi password at the office?");
        assert!(!e.is_from_self);
    }

    #[test]
    fn chat_message_fields() {
        let e = InboundEvent::from_chat_message("42", "1001", "what's on today?");
        assert_eq!(e.origin, EventOrigin::ChatPlatform);
        assert_eq!(e.service, CHAT_PLATFORM_SERVICE);
        assert_eq!(e.sender_address, "42");
        assert_eq!(e.chat_id.as_deref(), Some("1001"));
        assert_eq!(e.text(), "what's on today?");
        assert!(!e.is_from_self);
        assert_eq!(e.raw["channelId"], "1001");
    }

    #[test]
    fn missing_fields_are_empty() {
        let e = InboundEvent::from_bridge_payload(json!({"text": null, "isFromMe": true}));
        assert!(e.text.is_none());
        assert!(e.chat_id.is_none());
        assert_eq!(e.sender_address, "");
        assert!(e.is_from_self);
    }
}
