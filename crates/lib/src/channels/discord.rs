//! Discord chat platform on serenity: a gateway session for readiness and inbound
//! messages, and the REST client for DMs and channel posts.

use async_trait::async_trait;
use serenity::all::{
    ChannelId, Context, CreateMessage, EventHandler, GatewayIntents, Message as DiscordMessage,
    Ready, UserId,
};
use serenity::http::Http;
use serenity::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::inbound::InboundEvent;
use crate::config::ChatPlatformConfig;
use crate::gateway::{AuthorizedMessage, ChatPolicy};

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("chat platform error: {0}")]
    Serenity(#[from] serenity::Error),
    #[error("invalid chat platform id {0:?}")]
    InvalidId(String),
    #[error("chat platform bot token not configured")]
    NoToken,
}

/// Outbound side of a chat platform. Sends are only attempted once `is_ready` is true.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn is_ready(&self) -> bool;
    async fn send_to_user(&self, user_id: &str, text: &str) -> Result<(), PlatformError>;
    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<(), PlatformError>;
}

/// Discord snowflakes are non-zero integers.
fn snowflake(id: &str) -> Result<u64, PlatformError> {
    id.trim()
        .parse::<u64>()
        .ok()
        .filter(|n| *n != 0)
        .ok_or_else(|| PlatformError::InvalidId(id.to_string()))
}

pub struct DiscordClient {
    token: String,
    http: Arc<Http>,
    ready: AtomicBool,
}

impl DiscordClient {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            http: Arc::new(Http::new(&token)),
            token,
            ready: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &ChatPlatformConfig) -> Result<Self, PlatformError> {
        let token = cfg
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(PlatformError::NoToken)?;
        Ok(Self::new(token))
    }

    /// Hold a gateway session until it ends. The client is ready from the `ready` event
    /// until the session stops. With `inbound`, accepted messages are forwarded for routing.
    pub async fn run(
        self: Arc<Self>,
        inbound: Option<mpsc::UnboundedSender<AuthorizedMessage>>,
        policy: ChatPolicy,
    ) -> Result<(), PlatformError> {
        let mut intents = GatewayIntents::GUILDS;
        if inbound.is_some() {
            intents |= GatewayIntents::GUILD_MESSAGES
                | GatewayIntents::DIRECT_MESSAGES
                | GatewayIntents::MESSAGE_CONTENT;
        }
        let handler = DiscordHandler {
            client: self.clone(),
            inbound,
            policy,
        };
        let mut client = Client::builder(&self.token, intents)
            .event_handler(handler)
            .await?;
        let res = client.start().await;
        self.ready.store(false, Ordering::SeqCst);
        res.map_err(PlatformError::from)
    }

    async fn post(&self, channel: ChannelId, text: &str) -> Result<(), PlatformError> {
        channel
            .send_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Opens (or reuses) the DM channel, then posts into it.
    async fn send_to_user(&self, user_id: &str, text: &str) -> Result<(), PlatformError> {
        let user = UserId::new(snowflake(user_id)?);
        let dm = user.create_dm_channel(&self.http).await?;
        self.post(dm.id, text).await
    }

    async fn send_to_channel(&self, channel_id: &str, text: &str) -> Result<(), PlatformError> {
        self.post(ChannelId::new(snowflake(channel_id)?), text).await
    }
}

struct DiscordHandler {
    client: Arc<DiscordClient>,
    inbound: Option<mpsc::UnboundedSender<AuthorizedMessage>>,
    policy: ChatPolicy,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        log::info!("discord: logged in as {}", ready.user.name);
        self.client.ready.store(true, Ordering::SeqCst);
    }

    async fn message(&self, _ctx: Context, msg: DiscordMessage) {
        let Some(tx) = &self.inbound else {
            return;
        };
        let event = InboundEvent::from_chat_message(
            msg.author.id.to_string(),
            msg.channel_id.to_string(),
            msg.content.clone(),
        );
        match self.policy.admit(event, msg.author.bot) {
            Ok(accepted) => {
                log::info!("discord: message from {}", accepted.event.sender_address);
                if tx.send(accepted).is_err() {
                    log::warn!("discord: inbound queue closed, message dropped");
                }
            }
            Err(rejection) => log::debug!("discord: dropped message: {}", rejection),
        }
    }
}
