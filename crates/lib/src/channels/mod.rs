//! Channels the assistant talks through.
//!
//! The bridge (an iMessage relay) and the chat platform (Discord) are both sources of
//! inbound events and outbound targets. Bridge events reach the router through the
//! gateway; chat-platform messages through the Discord session.

mod bridge;
mod discord;
mod inbound;

pub use bridge::{BridgeClient, BridgeError};
pub use discord::{ChatPlatform, DiscordClient, PlatformError};
pub use inbound::{EventOrigin, InboundEvent, CHAT_PLATFORM_SERVICE};
