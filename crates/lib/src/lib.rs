//! memex core library: bridge gateway, intent routing, retrieval answers, tools,
//! delivery and the daily digest, used by the CLI.

pub mod agent;
pub mod channels;
pub mod classifier;
pub mod config;
pub mod digest;
pub mod dispatch;
pub mod gateway;
pub mod google;
pub mod init;
pub mod llm;
pub mod responder;
pub mod routing;
pub mod service;
pub mod store;
pub mod tools;
