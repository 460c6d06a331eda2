//! Inbound filter: transport, text, sender authorization and self-echo suppression.

use std::collections::HashSet;
use std::fmt;

use crate::channels::InboundEvent;
use crate::classifier::Intent;
use crate::config::{BridgeConfig, ChatPlatformConfig};
use crate::dispatch::OutboundTag;

/// Why an event was dropped. Not an error: rejected events are logged at debug level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterRejection {
    WrongService(String),
    NoText,
    UnauthorizedSender(String),
    SelfEcho,
    BotAuthor,
}

impl fmt::Display for FilterRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterRejection::WrongService(s) => write!(f, "service {:?} is not handled", s),
            FilterRejection::NoText => write!(f, "no text"),
            FilterRejection::UnauthorizedSender(s) => write!(f, "sender {} is not allowed", s),
            FilterRejection::SelfEcho => write!(f, "carries the outbound marker"),
            FilterRejection::BotAuthor => write!(f, "sent by a bot"),
        }
    }
}

/// An event that passed the filter, with its intent once classified.
#[derive(Debug, Clone)]
pub struct AuthorizedMessage {
    pub event: InboundEvent,
    pub text: String,
    pub intent: Option<Intent>,
}

#[derive(Debug, Clone)]
pub struct FilterPolicy {
    service: String,
    allowed_senders: HashSet<String>,
    recipient: Option<String>,
}

impl FilterPolicy {
    pub fn new(
        service: impl Into<String>,
        allowed_senders: impl IntoIterator<Item = String>,
        recipient: Option<String>,
    ) -> Self {
        Self {
            service: service.into(),
            allowed_senders: allowed_senders
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            recipient: recipient.filter(|r| !r.trim().is_empty()),
        }
    }

    pub fn from_config(cfg: &BridgeConfig) -> Self {
        Self::new(
            cfg.service.clone(),
            cfg.allowed_senders.clone(),
            cfg.recipient.clone(),
        )
    }

    /// Checks run in order and stop at the first failure.
    pub fn check(&self, event: &InboundEvent) -> Result<(), FilterRejection> {
        if event.service != self.service {
            return Err(FilterRejection::WrongService(event.service.clone()));
        }
        let text = event.text.as_deref().unwrap_or("");
        if text.trim().is_empty() {
            return Err(FilterRejection::NoText);
        }
        let listed = self.allowed_senders.contains(&event.sender_address);
        let own_chat = event.is_from_self
            && self.recipient.is_some()
            && event.chat_id.as_deref() == self.recipient.as_deref();
        if !listed && !own_chat {
            return Err(FilterRejection::UnauthorizedSender(event.sender_address.clone()));
        }
        if OutboundTag::is_tagged(text) {
            return Err(FilterRejection::SelfEcho);
        }
        Ok(())
    }

    pub fn admit(&self, event: InboundEvent) -> Result<AuthorizedMessage, FilterRejection> {
        self.check(&event)?;
        let text = event.text().trim().to_string();
        Ok(AuthorizedMessage {
            event,
            text,
            intent: None,
        })
    }
}

/// Chat-platform messages: no bots (ourselves included), text required, and only the
/// configured user when one is set.
#[derive(Debug, Clone, Default)]
pub struct ChatPolicy {
    allowed_user: Option<String>,
}

impl ChatPolicy {
    pub fn new(allowed_user: Option<String>) -> Self {
        Self {
            allowed_user: allowed_user
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    pub fn from_config(cfg: &ChatPlatformConfig) -> Self {
        Self::new(cfg.user_id.clone())
    }

    pub fn admit(
        &self,
        event: InboundEvent,
        author_is_bot: bool,
    ) -> Result<AuthorizedMessage, FilterRejection> {
        if author_is_bot {
            return Err(FilterRejection::BotAuthor);
        }
        let text = event.text().trim().to_string();
        if text.is_empty() {
            return Err(FilterRejection::NoText);
        }
        if let Some(ref user) = self.allowed_user {
            if &event.sender_address != user {
                return Err(FilterRejection::UnauthorizedSender(event.sender_address.clone()));
            }
        }
        Ok(AuthorizedMessage {
            event,
            text,
            intent: None,
        })
    }
}
