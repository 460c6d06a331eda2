//! Ingestion gateway: the bridge socket connection and the inbound filter.
//!
//! The listener owns the websocket and forwards accepted messages over a channel; a
//! single consumer (see `service`) routes them one at a time in arrival order.

mod engineio;
mod filter;
mod listener;

pub use engineio::{connect_frame, EngineFrame, FrameError, SocketPacket};
pub use filter::{AuthorizedMessage, ChatPolicy, FilterPolicy, FilterRejection};
pub use listener::{socket_url, BridgeListener, TransportError, NEW_MESSAGE_EVENT};
