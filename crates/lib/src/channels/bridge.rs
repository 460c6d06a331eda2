//! Bridge HTTP client: handshake probe and message creation.

use serde_json::json;

use crate::config::BridgeConfig;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bridge returned {0}: {1}")]
    Status(u16, String),
    #[error("bridge unreachable: {0}")]
    Handshake(String),
    #[error("bridge token not configured")]
    NoToken,
}

#[derive(Clone)]
pub struct BridgeClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(cfg: &BridgeConfig) -> Result<Self, BridgeError> {
        let token = cfg.token.clone().ok_or(BridgeError::NoToken)?;
        Ok(Self::new(cfg.http_base_url(), token))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Engine.IO polling handshake. The bridge is reachable and the token accepted
    /// when the body carries a session id.
    pub async fn probe(&self) -> Result<(), BridgeError> {
        let url = format!("{}/socket.io/", self.base_url);
        let res = self
            .client
            .get(&url)
            .query(&[
                ("EIO", "4"),
                ("transport", "polling"),
                ("password", self.token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| BridgeError::Handshake(e.to_string()))?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if status.is_success() && body.contains("sid") {
            return Ok(());
        }
        Err(BridgeError::Handshake(format!(
            "{} {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }

    /// POST /api/v1/chat/new. Only 200 counts as sent; the text goes out unchanged.
    pub async fn send_message(&self, recipient: &str, text: &str) -> Result<(), BridgeError> {
        let url = format!("{}/api/v1/chat/new", self.base_url);
        let body = json!({ "addresses": [recipient], "message": text });
        let res = self
            .client
            .post(&url)
            .query(&[("token", self.token.as_str())])
            .json(&body)
            .send()
            .await?;
        if res.status() != reqwest::StatusCode::OK {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(BridgeError::Status(status.as_u16(), body));
        }
        log::debug!("bridge: message sent to {}", recipient);
        Ok(())
    }
}
