//! Google APIs used by the tools: OAuth refresh-token auth, Calendar v3 and Gmail v1.
//!
//! Tools only see the [`CalendarBackend`] and [`MailBackend`] traits; the HTTP clients
//! here are wired in by the service host when Google credentials are configured.

mod calendar;
mod gmail;

use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub use calendar::{CalendarBackend, CalendarEvent, EventTime, GoogleCalendar, NewEvent};
pub use gmail::{html_to_text, Gmail, MailBackend, MailMessage};

use crate::config::GoogleConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Refresh this long before Google's stated expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("google request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("google api error: {0}")]
    Api(String),
    #[error("google auth failed: {0}")]
    Auth(String),
    #[error("google credentials not configured")]
    NotConfigured,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Exchanges the long-lived refresh token for short-lived access tokens, cached until
/// shortly before they expire.
pub struct GoogleAuth {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cache: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

impl GoogleAuth {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: TOKEN_URL.to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &GoogleConfig) -> Result<Self, GoogleError> {
        match (&cfg.client_id, &cfg.client_secret, &cfg.refresh_token) {
            (Some(id), Some(secret), Some(refresh)) => Ok(Self::new(id, secret, refresh)),
            _ => Err(GoogleError::NotConfigured),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// A valid access token, refreshing through the token endpoint when needed.
    pub async fn access_token(&self) -> Result<String, GoogleError> {
        let mut cache = self.cache.lock().await;
        if let Some(ref c) = *cache {
            if Instant::now() < c.expires_at {
                return Ok(c.token.clone());
            }
        }
        log::debug!("google: refreshing access token");
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        let res = self.client.post(&self.token_url).form(&params).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(GoogleError::Auth(format!("{} {}", status, body)));
        }
        let data: TokenResponse = res.json().await?;
        let ttl = Duration::from_secs(data.expires_in).saturating_sub(EXPIRY_MARGIN);
        *cache = Some(CachedToken {
            token: data.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(data.access_token)
    }
}

/// Shared status check for Google API responses.
async fn check(res: reqwest::Response) -> Result<reqwest::Response, GoogleError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    Err(GoogleError::Api(format!("{} {}", status, body)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_all_credentials() {
        let mut cfg = GoogleConfig::default();
        assert!(matches!(
            GoogleAuth::from_config(&cfg),
            Err(GoogleError::NotConfigured)
        ));
        cfg.client_id = Some("id".to_string());
        cfg.client_secret = Some("secret".to_string());
        cfg.refresh_token = Some("refresh".to_string());
        assert!(GoogleAuth::from_config(&cfg).is_ok());
    }

    #[test]
    fn token_response_defaults_expiry() {
        let t: TokenResponse = serde_json::from_str(r#"{"access_token":"ya29.x"}"#).unwrap();
        assert_eq!(t.expires_in, 3600);
    }
}
