//! Outbound delivery: chat-platform fan-out with a readiness retry, and bridge sends
//! carrying the [`OutboundTag`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::channels::{BridgeClient, BridgeError, ChatPlatform, PlatformError};
use crate::config::ChatPlatformConfig;

/// Chat platforms reject longer messages.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryTarget {
    ChatPlatform,
    Bridge,
}

/// Invisible marker appended to everything sent through the bridge, so the gateway can
/// recognize the assistant's own messages when the bridge echoes them back.
pub struct OutboundTag;

impl OutboundTag {
    pub const MARKER: &'static str = "\u{200B}\u{200C}\u{200D}";

    pub fn apply(text: &str) -> String {
        if Self::is_tagged(text) {
            text.to_string()
        } else {
            format!("{}{}", text, Self::MARKER)
        }
    }

    pub fn is_tagged(text: &str) -> bool {
        text.ends_with(Self::MARKER)
    }
}

/// A reply ready for delivery. Consumed by [`Dispatcher::deliver_draft`].
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseDraft {
    pub text: String,
    pub channel_hints: BTreeSet<DeliveryTarget>,
}

impl ResponseDraft {
    pub fn new(text: impl Into<String>, targets: impl IntoIterator<Item = DeliveryTarget>) -> Self {
        Self {
            text: text.into(),
            channel_hints: targets.into_iter().collect(),
        }
    }
}

/// Retry state for one chat-platform send.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub channel: DeliveryTarget,
    pub payload: String,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("bridge delivery failed: {0}")]
    Bridge(#[from] BridgeError),
    #[error("chat platform delivery failed: {0}")]
    Platform(#[from] PlatformError),
    #[error("{0:?} delivery is not configured")]
    NotConfigured(DeliveryTarget),
}

struct PlatformRoute {
    platform: Arc<dyn ChatPlatform>,
    user_id: Option<String>,
    channel_id: Option<String>,
}

struct BridgeRoute {
    client: BridgeClient,
    recipient: String,
}

pub struct Dispatcher {
    platform: Option<PlatformRoute>,
    bridge: Option<BridgeRoute>,
    ready_retries: u32,
    ready_backoff: Duration,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// No targets; add them with [`with_platform`](Self::with_platform) and
    /// [`with_bridge`](Self::with_bridge).
    pub fn new() -> Self {
        Self {
            platform: None,
            bridge: None,
            ready_retries: 3,
            ready_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_platform(
        mut self,
        platform: Arc<dyn ChatPlatform>,
        cfg: &ChatPlatformConfig,
    ) -> Self {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
        self.platform = Some(PlatformRoute {
            platform,
            user_id: non_empty(&cfg.user_id),
            channel_id: non_empty(&cfg.channel_id),
        });
        self.ready_retries = cfg.ready_retries;
        self.ready_backoff = Duration::from_secs(cfg.ready_backoff_secs);
        self
    }

    pub fn with_bridge(mut self, client: BridgeClient, recipient: impl Into<String>) -> Self {
        self.bridge = Some(BridgeRoute {
            client,
            recipient: recipient.into(),
        });
        self
    }

    pub fn has_target(&self, target: DeliveryTarget) -> bool {
        match target {
            DeliveryTarget::ChatPlatform => self.platform.is_some(),
            DeliveryTarget::Bridge => self.bridge.is_some(),
        }
    }

    pub async fn deliver_draft(&self, draft: ResponseDraft) -> Result<(), DeliveryError> {
        let targets: Vec<DeliveryTarget> = draft.channel_hints.into_iter().collect();
        self.deliver(&draft.text, &targets).await
    }

    /// Send `text` to every target. Chat-platform problems are logged only; the first
    /// bridge error is returned after all targets were tried.
    pub async fn deliver(&self, text: &str, targets: &[DeliveryTarget]) -> Result<(), DeliveryError> {
        if text.trim().is_empty() {
            log::debug!("dispatch: empty message, nothing to deliver");
            return Ok(());
        }
        let mut first_err = None;
        for target in targets {
            let res = match target {
                DeliveryTarget::ChatPlatform => {
                    self.deliver_platform(text).await;
                    Ok(())
                }
                DeliveryTarget::Bridge => self.deliver_bridge(text).await,
            };
            if let Err(e) = res {
                log::error!("dispatch: {}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Answer in the chat-platform channel a message came from. The session that received
    /// the message is live, so there is no readiness wait.
    pub async fn reply_in_channel(&self, channel_id: &str, text: &str) -> Result<(), DeliveryError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        let route = self
            .platform
            .as_ref()
            .ok_or(DeliveryError::NotConfigured(DeliveryTarget::ChatPlatform))?;
        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            route.platform.send_to_channel(channel_id, &chunk).await?;
        }
        log::info!("dispatch: replied in channel {}", channel_id);
        Ok(())
    }

    async fn deliver_bridge(&self, text: &str) -> Result<(), DeliveryError> {
        let route = self
            .bridge
            .as_ref()
            .ok_or(DeliveryError::NotConfigured(DeliveryTarget::Bridge))?;
        route
            .client
            .send_message(&route.recipient, &OutboundTag::apply(text))
            .await?;
        log::info!("dispatch: bridge message sent");
        Ok(())
    }

    async fn deliver_platform(&self, text: &str) {
        let Some(ref route) = self.platform else {
            log::warn!("dispatch: chat platform target requested but not configured");
            return;
        };
        if route.user_id.is_none() && route.channel_id.is_none() {
            log::warn!("dispatch: no chat platform user or channel configured, skipping");
            return;
        }

        let mut attempt = DeliveryAttempt {
            channel: DeliveryTarget::ChatPlatform,
            payload: text.to_string(),
            attempt_count: 0,
            last_error: None,
        };
        if !self.wait_ready(route.platform.as_ref(), &mut attempt).await {
            log::warn!(
                "dispatch: chat platform not ready after {} checks, giving up: {}",
                attempt.attempt_count,
                attempt.last_error.as_deref().unwrap_or("not ready")
            );
            return;
        }

        for chunk in split_message(&attempt.payload, MAX_MESSAGE_CHARS) {
            if let Some(ref user) = route.user_id {
                match route.platform.send_to_user(user, &chunk).await {
                    Ok(()) => log::info!("dispatch: message sent to user {}", user),
                    Err(e) => log::error!("dispatch: send to user {} failed: {}", user, e),
                }
            }
            if let Some(ref channel) = route.channel_id {
                match route.platform.send_to_channel(channel, &chunk).await {
                    Ok(()) => log::info!("dispatch: message sent to channel {}", channel),
                    Err(e) => log::error!("dispatch: send to channel {} failed: {}", channel, e),
                }
            }
        }
    }

    /// Check readiness, then re-check after each backoff up to `ready_retries` times.
    async fn wait_ready(&self, platform: &dyn ChatPlatform, attempt: &mut DeliveryAttempt) -> bool {
        loop {
            attempt.attempt_count += 1;
            if platform.is_ready() {
                return true;
            }
            attempt.last_error = Some("chat platform not ready".to_string());
            if attempt.attempt_count > self.ready_retries {
                return false;
            }
            log::info!(
                "dispatch: chat platform not ready, retrying in {:?}",
                self.ready_backoff
            );
            tokio::time::sleep(self.ready_backoff).await;
        }
    }
}

/// Split into chunks of at most `limit` characters, preferring paragraph, then line,
/// then word boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut out = Vec::new();
    let mut rest = text.trim();
    while rest.chars().count() > limit {
        let hard = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..hard];
        let cut = window
            .rfind("\n\n")
            .or_else(|| window.rfind('\n'))
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(hard);
        out.push(rest[..cut].trim_end().to_string());
        rest = rest[cut..].trim_start();
    }
    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}
